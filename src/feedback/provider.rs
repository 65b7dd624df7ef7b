//! Provider abstraction for feedback generation.

use async_trait::async_trait;

/// How a provider answered a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    /// Well-formed answer with the generated text
    Success(String),
    /// Model or endpoint does not exist
    NotFound,
    /// Quota exhausted for now
    RateLimited,
    /// Temporarily overloaded; worth one more try after a pause
    Unavailable,
    /// Any other rejection
    Failed { status: Option<u16>, detail: String },
}

/// Failures below the response level.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider network error: {0}")]
    Network(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("provider configuration error: {0}")]
    Config(String),
}

/// One feedback-generation endpoint.
#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Ask the provider for commentary on `prompt`.
    async fn generate(&self, prompt: &str) -> Result<ProviderReply, ProviderError>;
}
