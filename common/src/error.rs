use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model provider not configured: {0}")]
    Configuration(String),

    #[error("Failed to communicate with AI: {0}")]
    Request(String),

    #[error("AI returned an empty completion")]
    EmptyCompletion,

    #[error("Failed to parse response: {0}")]
    Unparseable(String),
}

impl ModelError {
    /// Whether a second attempt with the same prompt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Request(_) | ModelError::EmptyCompletion)
    }
}
