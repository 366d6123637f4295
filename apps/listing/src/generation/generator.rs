//! Listing generation: drives the section engine over one requirement.
//!
//! Flow: title → bullets → description → search terms → document validation.
//! Each section prompt embeds everything generated before it, so the order is
//! fixed. Bullets use the batch-JSON protocol when the rule asks for it and the
//! client supports JSON mode; everything else uses the plain-text protocol.

use tracing::info;

use crate::errors::AppError;
use crate::generation::batch_json::generate_bullets_json;
use crate::generation::section::{apply_section, generate_section};
use crate::generation::validator::{validate_document, DocumentRole};
use crate::generation::GenerationOptions;
use crate::models::document::ListingDocument;
use crate::rules::{Protocol, Section};

/// Source document with the summed latency of its accepted attempts.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub document: ListingDocument,
    pub latency_ms: u64,
}

/// Empty document carrying the fixed fields from the requirement.
pub fn seed_document(opts: &GenerationOptions) -> ListingDocument {
    ListingDocument {
        keywords: opts.requirement.keywords.clone(),
        category: opts.requirement.category.trim().to_string(),
        ..Default::default()
    }
}

/// Generates `section` into `doc` and returns the latency it cost.
pub async fn generate_into(
    opts: &GenerationOptions,
    section: Section,
    doc: &mut ListingDocument,
) -> Result<u64, AppError> {
    let rule = opts.rules.get(section);
    let batch = section == Section::Bullets
        && rule.protocol() == Protocol::JsonLines
        && opts.llm.supports_json_mode();

    let latency_ms = if batch {
        let (bullets, latency_ms) = generate_bullets_json(opts, doc).await?;
        doc.bullets = bullets;
        latency_ms
    } else {
        let output = generate_section(opts, section, doc).await?;
        apply_section(doc, section, &output.text, rule)?;
        output.latency_ms
    };

    info!(section = section.as_str(), latency_ms, batch, "Section done");
    Ok(latency_ms)
}

/// Monolingual generation of one document.
pub async fn generate_document(opts: &GenerationOptions) -> Result<GeneratedDocument, AppError> {
    let mut doc = seed_document(opts);
    let mut latency_ms = 0;
    for section in Section::ALL {
        latency_ms += generate_into(opts, section, &mut doc).await?;
    }
    validate_document(DocumentRole::Source, &opts.requirement, &doc, &opts.rules)?;
    Ok(GeneratedDocument {
        document: doc,
        latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::generation::testing::*;

    #[tokio::test(start_paused = true)]
    async fn test_generates_complete_document() {
        let llm = Arc::new(happy_llm(false));
        let opts = options(llm.clone(), rules("text", "whole"));

        let generated = generate_document(&opts).await.unwrap();
        let doc = generated.document;

        assert_eq!(doc.title, GOOD_TITLE);
        assert_eq!(doc.bullets.len(), 5);
        assert_eq!(doc.bullets[0], "Bright warm glow light");
        assert_eq!(doc.description.len(), 2);
        assert_eq!(doc.search_terms, GOOD_SEARCH_TERMS);
        assert_eq!(doc.category, "Cat");
        assert_eq!(doc.keywords, keywords());
        assert_eq!(generated.latency_ms, 40);
        assert_eq!(llm.requests.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_prompts_embed_earlier_sections() {
        let llm = Arc::new(happy_llm(false));
        let opts = options(llm.clone(), rules("text", "whole"));
        generate_document(&opts).await.unwrap();

        let requests = llm.requests.lock();
        let search = requests.iter().find(|r| is_search_terms(r)).unwrap();
        assert!(search.user.contains(GOOD_TITLE));
        assert!(search.user.contains("5. Gift ready packaging box"));
        assert!(search.user.contains("Each set folds flat"));
        let title = requests.iter().find(|r| is_title(r)).unwrap();
        assert!(!title.user.contains("[Generated"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_json_protocol_needs_json_capable_client() {
        let llm = Arc::new(happy_llm(false));
        let opts = options(llm.clone(), rules("json_lines", "item"));
        generate_document(&opts).await.unwrap();
        assert!(llm.requests.lock().iter().all(|r| !r.json_mode));

        let llm = Arc::new(happy_llm(true));
        let opts = options(llm.clone(), rules("json_lines", "item"));
        let generated = generate_document(&opts).await.unwrap();
        assert_eq!(generated.document.bullets[4], "Gift ready packaging box");
        assert_eq!(llm.requests.lock().iter().filter(|r| r.json_mode).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bullet_count_failure_stops_generation() {
        let llm = Arc::new(
            ScriptedLlm::new(false)
                .on(is_title, |_| Ok(GOOD_TITLE.to_string()))
                .on(is_bullets, |_| {
                    Ok("1. Bright warm glow light\n2. Foldable paper frame\n3. Reusable party decor\n4. Easy hanging hooks kit".to_string())
                }),
        );
        let opts = options(llm.clone(), rules("text", "whole"));

        let err = generate_document(&opts).await.unwrap_err();
        assert!(matches!(err, AppError::Generation { ref section, .. } if section == "bullets"));
        assert!(err.to_string().contains("expected 5 bullets, got 4"));
        assert_eq!(llm.count(is_description), 0);
    }
}
