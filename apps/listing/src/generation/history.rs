use crate::llm_client::{Message, Role};

/// Append-only repair conversation for one section (or one item).
///
/// Each failed attempt adds the model's own output followed by the repair
/// instruction, so the next request sees what it produced and what to fix.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<(String, String)>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_repair(&mut self, assistant: impl Into<String>, instruction: impl Into<String>) {
        self.turns.push((assistant.into(), instruction.into()));
    }

    /// Flattened into alternating assistant/user messages.
    pub fn messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .flat_map(|(assistant, instruction)| {
                [
                    Message {
                        role: Role::Assistant,
                        content: assistant.clone(),
                    },
                    Message {
                        role: Role::User,
                        content: instruction.clone(),
                    },
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_alternate_in_append_order() {
        let mut history = ConversationHistory::new();
        assert!(history.messages().is_empty());

        history.push_repair("draft one", "fix length");
        history.push_repair("draft two", "fix keywords");

        let messages = history.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "draft one");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[3].content, "fix keywords");
    }
}
