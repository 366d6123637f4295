//! Bilingual orchestrator.
//!
//! Sections are generated in order in the source language. As soon as a
//! source unit exists its translation is spawned, so translation overlaps the
//! remaining generation. Every spawned task is joined before returning, even
//! when generation fails part-way.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::generation::backoff::{run_with_backoff, Attempt, RetryPolicy};
use crate::generation::generator::{generate_into, seed_document};
use crate::generation::join::TaskGroup;
use crate::generation::text::{
    clean_category_line, clean_keyword_line, clean_search_terms_line, clean_title_line,
    normalize_model_text,
};
use crate::generation::validator::{check_translated_units, validate_document, DocumentRole};
use crate::generation::GenerationOptions;
use crate::models::document::ListingDocument;
use crate::rules::Section;
use crate::translation::{check_batch_length, TranslateRequest, TranslationClient};

#[derive(Debug, Clone)]
pub struct BilingualDocument {
    pub source: ListingDocument,
    pub target: ListingDocument,
    pub source_latency_ms: u64,
    pub target_latency_ms: u64,
}

/// Where a translation lands in the target document. List sections are either
/// one slot per item, or one slot for the whole list with batch providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Category,
    Keyword(usize),
    Title,
    Bullet(usize),
    Paragraph(usize),
    SearchTerms,
    Keywords,
    Bullets,
    Description,
}

impl Slot {
    fn label(&self) -> String {
        match self {
            Slot::Category => "category".to_string(),
            Slot::Keyword(i) => format!("keyword {}", i + 1),
            Slot::Title => "title".to_string(),
            Slot::Bullet(i) => format!("bullet {}", i + 1),
            Slot::Paragraph(i) => format!("paragraph {}", i + 1),
            Slot::SearchTerms => "search terms".to_string(),
            Slot::Keywords => "keywords".to_string(),
            Slot::Bullets => "bullets".to_string(),
            Slot::Description => "description".to_string(),
        }
    }

    fn cleaner(&self) -> fn(&str) -> String {
        match self {
            Slot::Category => clean_category_line,
            Slot::Keyword(_) | Slot::Keywords => clean_keyword_line,
            Slot::Title => clean_title_line,
            Slot::SearchTerms => clean_search_terms_line,
            Slot::Bullet(_) | Slot::Paragraph(_) | Slot::Bullets | Slot::Description => trim_owned,
        }
    }
}

fn trim_owned(s: &str) -> String {
    s.trim().to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// Translation attempts
// ────────────────────────────────────────────────────────────────────────────

struct UnitAttempt {
    translator: Arc<dyn TranslationClient>,
    text: String,
    search_terms: bool,
    clean: fn(&str) -> String,
    retry_note: Option<String>,
}

#[async_trait]
impl Attempt for UnitAttempt {
    type Output = (Vec<String>, u64);
    type Error = String;

    async fn attempt(&mut self, _n: u32) -> Result<(Vec<String>, u64), String> {
        let request = TranslateRequest {
            text: self.text.clone(),
            search_terms: self.search_terms,
            retry_note: self.retry_note.clone(),
        };
        let translated = match self.translator.translate(&request).await {
            Ok(translated) => translated,
            Err(e) => {
                self.retry_note = Some(format!("- the previous request failed: {e}"));
                return Err(format!("translation request failed: {e}"));
            }
        };
        let text = (self.clean)(&normalize_model_text(&translated.text));
        if text.is_empty() {
            self.retry_note = Some("- the previous translation was empty".to_string());
            return Err("translation is empty".to_string());
        }
        Ok((vec![text], translated.latency_ms))
    }
}

struct BatchAttempt {
    translator: Arc<dyn TranslationClient>,
    texts: Vec<String>,
    clean: fn(&str) -> String,
}

#[async_trait]
impl Attempt for BatchAttempt {
    type Output = (Vec<String>, u64);
    type Error = String;

    async fn attempt(&mut self, _n: u32) -> Result<(Vec<String>, u64), String> {
        let batch = self
            .translator
            .translate_batch(&self.texts)
            .await
            .map_err(|e| format!("batch translation failed: {e}"))?;
        check_batch_length(self.texts.len(), batch.texts.len()).map_err(|e| e.to_string())?;

        let texts: Vec<String> = batch
            .texts
            .iter()
            .map(|t| (self.clean)(&normalize_model_text(t)))
            .collect();
        if let Some(i) = texts.iter().position(|t| t.is_empty()) {
            return Err(format!("item {} translated empty", i + 1));
        }
        Ok((texts, batch.latency_ms))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduling
// ────────────────────────────────────────────────────────────────────────────

struct Translations<'a> {
    opts: &'a GenerationOptions,
    translator: Arc<dyn TranslationClient>,
    group: TaskGroup<Slot, (Vec<String>, u64), AppError>,
}

impl<'a> Translations<'a> {
    fn new(opts: &'a GenerationOptions, translator: Arc<dyn TranslationClient>) -> Self {
        Self {
            opts,
            translator,
            group: TaskGroup::new(),
        }
    }

    fn policy(&self, slot: Slot) -> RetryPolicy {
        self.opts.retry_policy(&format!("translate {}", slot.label()))
    }

    fn unit(&mut self, slot: Slot, text: &str) {
        let policy = self.policy(slot);
        let mut attempt = UnitAttempt {
            translator: self.translator.clone(),
            text: text.to_string(),
            search_terms: slot == Slot::SearchTerms,
            clean: slot.cleaner(),
            retry_note: None,
        };
        self.group.spawn(slot, async move {
            run_with_backoff(&policy, &mut attempt)
                .await
                .map_err(|issues| AppError::translation(slot.label(), issues))
        });
    }

    /// One task per item, or a single batch task for batch providers.
    fn list(&mut self, items: &[String], per_item: fn(usize) -> Slot, whole: Slot) {
        if !self.translator.is_batch_oriented() {
            for (i, item) in items.iter().enumerate() {
                self.unit(per_item(i), item);
            }
            return;
        }
        let policy = self.policy(whole);
        let mut attempt = BatchAttempt {
            translator: self.translator.clone(),
            texts: items.to_vec(),
            clean: whole.cleaner(),
        };
        self.group.spawn(whole, async move {
            run_with_backoff(&policy, &mut attempt)
                .await
                .map_err(|issues| AppError::translation(whole.label(), issues))
        });
    }

    /// Schedules the translations that become possible once `section` exists.
    fn after_section(&mut self, section: Section, source: &ListingDocument) {
        match section {
            Section::Title => self.unit(Slot::Title, &source.title),
            Section::Bullets => self.list(&source.bullets, Slot::Bullet, Slot::Bullets),
            Section::Description => {
                self.list(&source.description, Slot::Paragraph, Slot::Description)
            }
            Section::SearchTerms => self.unit(Slot::SearchTerms, &source.search_terms),
        }
    }
}

async fn generate_and_schedule(
    opts: &GenerationOptions,
    source: &mut ListingDocument,
    translations: &mut Translations<'_>,
) -> Result<u64, AppError> {
    let mut latency_ms = 0;
    for section in Section::ALL {
        latency_ms += generate_into(opts, section, source).await?;
        translations.after_section(section, source);
    }
    Ok(latency_ms)
}

fn place(slots: &mut [String], texts: Vec<String>) {
    for (slot, text) in slots.iter_mut().zip(texts) {
        *slot = text;
    }
}

fn first(texts: Vec<String>) -> String {
    texts.into_iter().next().unwrap_or_default()
}

fn assemble_target(
    source: &ListingDocument,
    results: Vec<(Slot, (Vec<String>, u64))>,
) -> (ListingDocument, u64) {
    let mut target = ListingDocument {
        keywords: vec![String::new(); source.keywords.len()],
        bullets: vec![String::new(); source.bullets.len()],
        description: vec![String::new(); source.description.len()],
        ..Default::default()
    };
    let mut latency_ms = 0;
    for (slot, (texts, latency)) in results {
        latency_ms += latency;
        match slot {
            Slot::Category => target.category = first(texts),
            Slot::Title => target.title = first(texts),
            Slot::SearchTerms => target.search_terms = first(texts),
            Slot::Keyword(i) => place(&mut target.keywords[i..], texts),
            Slot::Bullet(i) => place(&mut target.bullets[i..], texts),
            Slot::Paragraph(i) => place(&mut target.description[i..], texts),
            Slot::Keywords => place(&mut target.keywords, texts),
            Slot::Bullets => place(&mut target.bullets, texts),
            Slot::Description => place(&mut target.description, texts),
        }
    }
    (target, latency_ms)
}

/// Generates the source document and its translation.
///
/// A generation error takes precedence over translation errors; either way
/// no task outlives this call.
pub async fn generate_bilingual_document(
    opts: &GenerationOptions,
    translator: Arc<dyn TranslationClient>,
) -> Result<BilingualDocument, AppError> {
    let mut source = seed_document(opts);
    let mut translations = Translations::new(opts, translator);
    translations.unit(Slot::Category, &source.category);
    translations.list(&source.keywords, Slot::Keyword, Slot::Keywords);

    let generated = generate_and_schedule(opts, &mut source, &mut translations).await;
    if let Err(e) = &generated {
        warn!(
            error = %e,
            pending = translations.group.spawned().saturating_sub(translations.group.completed()),
            "Generation failed, waiting for scheduled translations"
        );
    }
    let scheduled = translations.group.spawned();
    let joined = translations.group.join_all().await;

    let source_latency_ms = generated?;
    let results = joined?;
    let (target, target_latency_ms) = assemble_target(&source, results);
    info!(
        translations = scheduled,
        source_latency_ms, target_latency_ms, "Translations joined"
    );

    check_translated_units(&target)?;
    validate_document(DocumentRole::Source, &opts.requirement, &source, &opts.rules)?;
    validate_document(DocumentRole::Target, &opts.requirement, &target, &opts.rules)?;

    Ok(BilingualDocument {
        source,
        target,
        source_latency_ms,
        target_latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::generation::testing::*;
    use crate::translation::{Translated, TranslatedBatch, TranslationError};

    struct FakeTranslator {
        batch: bool,
        empty_for: Option<&'static str>,
        requests: Mutex<Vec<TranslateRequest>>,
        batch_calls: AtomicUsize,
    }

    impl FakeTranslator {
        fn new(batch: bool, empty_for: Option<&'static str>) -> Self {
            Self {
                batch,
                empty_for,
                requests: Mutex::new(Vec::new()),
                batch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TranslationClient for FakeTranslator {
        fn is_batch_oriented(&self) -> bool {
            self.batch
        }

        async fn translate(&self, request: &TranslateRequest) -> Result<Translated, TranslationError> {
            self.requests.lock().push(request.clone());
            let text = if Some(request.text.as_str()) == self.empty_for {
                String::new()
            } else {
                format!("zh:{}", request.text)
            };
            Ok(Translated {
                text,
                latency_ms: 5,
            })
        }

        async fn translate_batch(&self, texts: &[String]) -> Result<TranslatedBatch, TranslationError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TranslatedBatch {
                texts: texts.iter().map(|t| format!("zh:{t}")).collect(),
                latency_ms: 7,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_translates_every_unit() {
        let llm = Arc::new(happy_llm(false));
        let opts = options(llm, rules("text", "whole"));
        let translator = Arc::new(FakeTranslator::new(false, None));

        let out = generate_bilingual_document(&opts, translator.clone())
            .await
            .unwrap();

        // category + 15 keywords + title + 5 bullets + 2 paragraphs + search terms
        assert_eq!(translator.requests.lock().len(), 25);
        assert_eq!(out.target.title, format!("zh:{GOOD_TITLE}"));
        assert_eq!(out.target.category, "zh:Cat");
        assert_eq!(out.target.keywords[14], "zh:kw15");
        assert_eq!(out.target.bullets[1], "zh:Foldable paper frame");
        assert_eq!(out.target.description.len(), 2);
        assert_eq!(out.target.search_terms, format!("zh:{GOOD_SEARCH_TERMS}"));
        assert_eq!(out.source.title, GOOD_TITLE);
        assert_eq!(out.source_latency_ms, 40);
        assert_eq!(out.target_latency_ms, 125);

        let requests = translator.requests.lock();
        let search = requests.iter().find(|r| r.search_terms).unwrap();
        assert_eq!(search.text, GOOD_SEARCH_TERMS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_provider_gets_one_task_per_list() {
        let llm = Arc::new(happy_llm(false));
        let opts = options(llm, rules("text", "whole"));
        let translator = Arc::new(FakeTranslator::new(true, None));

        let out = generate_bilingual_document(&opts, translator.clone())
            .await
            .unwrap();

        assert_eq!(translator.batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(translator.requests.lock().len(), 3);
        assert_eq!(out.target.keywords.len(), 15);
        assert_eq!(out.target.bullets[4], "zh:Gift ready packaging box");
        assert_eq!(out.target_latency_ms, 3 * 5 + 3 * 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_unit_fails_the_document() {
        let llm = Arc::new(happy_llm(false));
        let opts = options(llm, rules("text", "whole"));
        let translator = Arc::new(FakeTranslator::new(false, Some("kw3")));

        let err = generate_bilingual_document(&opts, translator.clone())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "translation of keyword 3 failed: translation is empty"
        );
        let requests = translator.requests.lock();
        // Every other unit still ran; the failing one used its whole budget.
        assert_eq!(requests.len(), 24 + 3);
        let retries: Vec<_> = requests.iter().filter(|r| r.text == "kw3").collect();
        assert_eq!(retries[0].retry_note, None);
        assert_eq!(
            retries[1].retry_note.as_deref(),
            Some("- the previous translation was empty")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_error_wins_after_joining_translations() {
        let llm = Arc::new(ScriptedLlm::new(false).on(is_title, |_| Ok("no keywords".to_string())));
        let opts = options(llm, rules("text", "whole"));
        let translator = Arc::new(FakeTranslator::new(false, Some("kw1")));

        let err = generate_bilingual_document(&opts, translator.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Generation { .. }));
        // Category and keyword tasks were scheduled before the title and all finished.
        assert_eq!(translator.requests.lock().len(), 1 + 14 + 3);
    }
}
