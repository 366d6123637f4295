use thiserror::Error;

/// Application-level error type.
/// Every candidate failure is reported through one of these variants; the job
/// runner counts it as failed and logs the message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Rules error: {0}")]
    Rules(String),

    #[error("Requirement error: {0}")]
    Requirement(String),

    /// A section exhausted its retry budget. `issues` is the last concrete issue text.
    #[error("{section} failed after retries: {issues}")]
    Generation { section: String, issues: String },

    /// A translation unit exhausted its retry budget, or the assembled
    /// target-language document has an empty unit.
    #[error("translation of {unit} failed: {issues}")]
    Translation { unit: String, issues: String },

    /// Cross-field check on a finished document. Never retried.
    #[error("Document validation failed: {0}")]
    Document(String),

    /// A spawned repair or translation task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn generation(section: impl Into<String>, issues: impl Into<String>) -> Self {
        AppError::Generation {
            section: section.into(),
            issues: issues.into(),
        }
    }

    pub fn translation(unit: impl Into<String>, issues: impl Into<String>) -> Self {
        AppError::Translation {
            unit: unit.into(),
            issues: issues.into(),
        }
    }
}
