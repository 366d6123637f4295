use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::llm_client::join_url;
use crate::translation::{
    check_batch_length, TranslateRequest, Translated, TranslatedBatch, TranslationClient,
    TranslationError,
};

pub const DEFAULT_BASE_URL: &str = "https://api-free.deepl.com";

#[derive(Debug, Serialize)]
struct DeepLRequest<'a> {
    text: &'a [String],
    source_lang: String,
    target_lang: String,
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct DeepLError {
    message: String,
}

/// Machine-translation API that takes a list of texts per request.
#[derive(Clone)]
pub struct DeepLTranslator {
    client: Client,
    base_url: String,
    api_key: String,
    source: String,
    target: String,
}

impl DeepLTranslator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranslationError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            source: source.into(),
            target: target.into(),
        })
    }
}

/// DeepL wants upper-case tags and calls Chinese `ZH`.
fn deepl_lang(tag: &str) -> String {
    match tag.trim().to_ascii_lowercase().as_str() {
        "cn" | "zh-cn" | "zh-hans" => "ZH".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

#[async_trait]
impl TranslationClient for DeepLTranslator {
    fn is_batch_oriented(&self) -> bool {
        true
    }

    async fn translate(&self, request: &TranslateRequest) -> Result<Translated, TranslationError> {
        let batch = self.translate_batch(std::slice::from_ref(&request.text)).await?;
        let text = batch
            .texts
            .into_iter()
            .next()
            .ok_or(TranslationError::EmptyContent)?;
        Ok(Translated {
            text,
            latency_ms: batch.latency_ms,
        })
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<TranslatedBatch, TranslationError> {
        let started = Instant::now();
        let body = DeepLRequest {
            text: texts,
            source_lang: deepl_lang(&self.source),
            target_lang: deepl_lang(&self.target),
        };
        let response = self
            .client
            .post(join_url(&self.base_url, "/v2/translate"))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<DeepLError>(&raw)
                .map(|e| e.message)
                .unwrap_or(raw);
            return Err(TranslationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: DeepLResponse = serde_json::from_str(&raw)?;
        check_batch_length(texts.len(), parsed.translations.len())?;
        Ok(TranslatedBatch {
            texts: parsed.translations.into_iter().map(|t| t.text).collect(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
