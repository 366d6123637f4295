use std::sync::Arc;

use async_trait::async_trait;

use crate::llm_client::{GenerationClient, GenerationRequest};
use crate::translation::{
    language_name, TranslateRequest, Translated, TranslationClient, TranslationError,
};

/// Translates through an LLM chat endpoint, one unit per call.
pub struct ChatTranslator {
    llm: Arc<dyn GenerationClient>,
    model: String,
    source: String,
    target: String,
}

impl ChatTranslator {
    pub fn new(
        llm: Arc<dyn GenerationClient>,
        model: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    fn system_prompt(&self, search_terms: bool) -> String {
        let mut prompt = format!(
            "You are a professional translator. Translate {} e-commerce listing copy into natural {}. \
             Output only the translation, with no explanation, prefix or suffix. \
             Keep brand names, numbers, sizes and units unchanged.",
            language_name(&self.source),
            language_name(&self.target)
        );
        if search_terms {
            prompt.push_str(
                " Search terms must be output on a single line, separated by spaces, without commas.",
            );
        }
        prompt
    }

    fn user_prompt(&self, request: &TranslateRequest) -> String {
        let mut prompt = if request.search_terms {
            format!(
                "Translate the following {} search terms into {}, keeping keyword order, on one line:\n{}",
                language_name(&self.source),
                language_name(&self.target),
                request.text
            )
        } else {
            format!(
                "Translate the following {} copy into {}:\n{}",
                language_name(&self.source),
                language_name(&self.target),
                request.text
            )
        };
        if let Some(note) = &request.retry_note {
            prompt.push_str("\n\nIssues in the previous translation that must be fixed:\n");
            prompt.push_str(note);
        }
        prompt
    }
}

#[async_trait]
impl TranslationClient for ChatTranslator {
    async fn translate(&self, request: &TranslateRequest) -> Result<Translated, TranslationError> {
        let generated = self
            .llm
            .generate(&GenerationRequest {
                model: self.model.clone(),
                system: self.system_prompt(request.search_terms),
                user: self.user_prompt(request),
                history: Vec::new(),
                json_mode: false,
            })
            .await?;
        Ok(Translated {
            text: generated.text,
            latency_ms: generated.latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{Generated, LlmError};
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl GenerationClient for Recorder {
        fn supports_json_mode(&self) -> bool {
            false
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Generated, LlmError> {
            self.seen.lock().push(request.clone());
            Ok(Generated {
                text: format!("zh:{}", request.user.lines().last().unwrap_or_default()),
                latency_ms: 5,
            })
        }
    }

    #[tokio::test]
    async fn test_search_terms_prompt_and_retry_note() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let translator = ChatTranslator::new(recorder.clone(), "glm-4", "en", "zh");

        let out = translator
            .translate(&TranslateRequest {
                text: "lantern decor".into(),
                search_terms: true,
                retry_note: Some("- translation was empty".into()),
            })
            .await
            .unwrap();

        assert_eq!(out.text, "zh:- translation was empty");
        let seen = recorder.seen.lock();
        assert_eq!(seen[0].model, "glm-4");
        assert!(seen[0].system.contains("single line"));
        assert!(seen[0].user.contains("into Chinese"));
        assert!(seen[0].user.contains("lantern decor"));
    }

    #[tokio::test]
    async fn test_default_batch_translates_each_text_in_order() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let translator = ChatTranslator::new(recorder.clone(), "glm-4", "en", "zh");

        let batch = translator
            .translate_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(batch.texts, vec!["zh:a", "zh:b"]);
        assert_eq!(batch.latency_ms, 10);
        assert!(!translator.is_batch_oriented());
    }
}
