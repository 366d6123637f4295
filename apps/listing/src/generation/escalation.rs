// Model escalation on late retries.
// Plugged into the section engine; the default configuration escalates to the
// provider's reasoning model from the third attempt on.

pub const DEFAULT_ESCALATION_ATTEMPT: u32 = 3;

pub trait ModelEscalation: Send + Sync {
    /// Alternate model for attempt `attempt`, or `None` to stay on `base`.
    /// `length_suppressed` is set when the previous failure was a length
    /// violation and the section rule turns escalation off for those.
    fn escalate(&self, base: &str, attempt: u32, length_suppressed: bool) -> Option<String>;
}

/// Always stays on the base model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEscalation;

impl ModelEscalation for NoEscalation {
    fn escalate(&self, _base: &str, _attempt: u32, _length_suppressed: bool) -> Option<String> {
        None
    }
}

/// Switches to `model` once `attempt` reaches `threshold`.
#[derive(Debug, Clone)]
pub struct ReasoningFallback {
    pub model: String,
    pub threshold: u32,
    pub enabled: bool,
}

impl ReasoningFallback {
    pub fn new(model: impl Into<String>, threshold: u32, enabled: bool) -> Self {
        Self {
            model: model.into(),
            threshold: if threshold == 0 {
                DEFAULT_ESCALATION_ATTEMPT
            } else {
                threshold
            },
            enabled,
        }
    }
}

impl ModelEscalation for ReasoningFallback {
    fn escalate(&self, base: &str, attempt: u32, length_suppressed: bool) -> Option<String> {
        let model = self.model.trim();
        if !self.enabled || length_suppressed || attempt < self.threshold || model.is_empty() {
            return None;
        }
        if model.eq_ignore_ascii_case(base.trim()) {
            return None;
        }
        Some(model.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalates_from_threshold() {
        let policy = ReasoningFallback::new("deepseek-reasoner", 3, true);
        assert_eq!(policy.escalate("deepseek-chat", 1, false), None);
        assert_eq!(policy.escalate("deepseek-chat", 2, false), None);
        assert_eq!(
            policy.escalate("deepseek-chat", 3, false).as_deref(),
            Some("deepseek-reasoner")
        );
        assert!(policy.escalate("deepseek-chat", 4, false).is_some());
    }

    #[test]
    fn test_length_failure_suppresses_escalation() {
        let policy = ReasoningFallback::new("deepseek-reasoner", 3, true);
        assert_eq!(policy.escalate("deepseek-chat", 3, true), None);
    }

    #[test]
    fn test_same_model_or_disabled_never_escalates() {
        assert_eq!(
            ReasoningFallback::new("Deepseek-Chat", 1, true).escalate("deepseek-chat", 5, false),
            None
        );
        assert_eq!(
            ReasoningFallback::new("deepseek-reasoner", 1, false).escalate("deepseek-chat", 5, false),
            None
        );
        assert_eq!(NoEscalation.escalate("deepseek-chat", 9, false), None);
    }

    #[test]
    fn test_zero_threshold_uses_default() {
        assert_eq!(ReasoningFallback::new("r", 0, true).threshold, DEFAULT_ESCALATION_ATTEMPT);
    }
}
