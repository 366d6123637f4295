// Constrained listing generation.
// Section engine (plain-text and batch-JSON protocols), bilingual orchestrator,
// and the final document validator. All LLM calls go through llm_client.

use std::sync::Arc;

use tracing::{info, warn};

use crate::generation::backoff::RetryPolicy;
use crate::generation::escalation::ModelEscalation;
use crate::llm_client::GenerationClient;
use crate::models::requirement::Requirement;
use crate::rules::SectionRules;

pub mod backoff;
pub mod batch_json;
pub mod bilingual;
pub mod bounds;
pub mod escalation;
pub mod generator;
pub mod history;
pub mod join;
pub mod prompts;
pub mod section;
pub mod text;
pub mod validator;

/// Everything one candidate needs to generate a document. Cheap to clone;
/// item-repair and translation tasks each take their own copy.
#[derive(Clone)]
pub struct GenerationOptions {
    pub requirement: Arc<Requirement>,
    pub rules: Arc<SectionRules>,
    pub llm: Arc<dyn GenerationClient>,
    /// Base model for every attempt that is not escalated.
    pub model: String,
    pub escalation: Arc<dyn ModelEscalation>,
    pub char_tolerance: usize,
    pub max_retries: u32,
    /// Source language tag, e.g. `en`.
    pub lang: String,
}

impl GenerationOptions {
    /// Retry policy whose hook logs every backoff under `label`.
    pub fn retry_policy(&self, label: &str) -> RetryPolicy {
        let label = label.to_string();
        RetryPolicy::new(self.max_retries).with_hook(Arc::new(move |attempt, wait, error: &str| {
            warn!(
                unit = %label,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error,
                "Retrying after backoff"
            );
        }))
    }

    /// Model for attempt `n`. `length_suppressed` is true when the previous
    /// failure was a length violation and the rule disables escalation for it.
    pub fn model_for_attempt(&self, label: &str, n: u32, length_suppressed: bool) -> String {
        match self.escalation.escalate(&self.model, n, length_suppressed) {
            Some(model) => {
                info!(unit = label, attempt = n, model = %model, "Escalating to reasoning model");
                model
            }
            None => self.model.clone(),
        }
    }
}
