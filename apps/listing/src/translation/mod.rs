//! Translation capability: mirrors generated units into the target language.
//!
//! Two wire styles exist: chat-style providers translate one unit per call,
//! batch-oriented providers take a list of texts and must return the same
//! number back. The bilingual orchestrator picks its scheduling from
//! `is_batch_oriented()`.

use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

pub mod chat;
pub mod deepl;

pub use chat::ChatTranslator;
pub use deepl::DeepLTranslator;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Llm(#[from] crate::llm_client::LlmError),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("translation returned empty content")]
    EmptyContent,

    #[error("batch translation returned {got} texts for {expected} inputs")]
    BatchLength { expected: usize, got: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationProvider {
    /// Monolingual mode.
    None,
    Chat,
    DeepL,
}

impl FromStr for TranslationProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(TranslationProvider::None),
            "chat" => Ok(TranslationProvider::Chat),
            "deepl" => Ok(TranslationProvider::DeepL),
            other => Err(format!("unsupported translation provider: {other}")),
        }
    }
}

/// One unit to translate.
#[derive(Debug, Clone, Default)]
pub struct TranslateRequest {
    pub text: String,
    /// Search terms must come back as a single space-separated line.
    pub search_terms: bool,
    /// Issue text from the previous failed attempt, if any.
    pub retry_note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Translated {
    pub text: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TranslatedBatch {
    pub texts: Vec<String>,
    pub latency_ms: u64,
}

#[async_trait]
pub trait TranslationClient: Send + Sync {
    /// Batch-oriented providers get one task per list section instead of one
    /// per unit.
    fn is_batch_oriented(&self) -> bool {
        false
    }

    async fn translate(&self, request: &TranslateRequest) -> Result<Translated, TranslationError>;

    /// Default: one `translate` call per text, in order.
    async fn translate_batch(&self, texts: &[String]) -> Result<TranslatedBatch, TranslationError> {
        let mut out = Vec::with_capacity(texts.len());
        let mut latency_ms = 0;
        for text in texts {
            let translated = self
                .translate(&TranslateRequest {
                    text: text.clone(),
                    ..Default::default()
                })
                .await?;
            latency_ms += translated.latency_ms;
            out.push(translated.text);
        }
        Ok(TranslatedBatch {
            texts: out,
            latency_ms,
        })
    }
}

/// Display name for a language tag, used in prompts.
pub fn language_name(tag: &str) -> String {
    match tag.trim().to_ascii_lowercase().as_str() {
        "en" => "English".to_string(),
        "zh" | "cn" | "zh-cn" | "zh-hans" => "Chinese".to_string(),
        "de" => "German".to_string(),
        "fr" => "French".to_string(),
        "es" => "Spanish".to_string(),
        "ja" => "Japanese".to_string(),
        other => other.to_string(),
    }
}

/// Checks a batch response against its request.
pub fn check_batch_length(expected: usize, got: usize) -> Result<(), TranslationError> {
    if expected != got {
        return Err(TranslationError::BatchLength { expected, got });
    }
    Ok(())
}
