use crate::messages::{MessagesRequest, MessagesResponse};
use async_trait::async_trait;
use sightline_http::HttpError;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    /// Throttled by the provider; the caller should cool down and resend.
    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<Duration> },

    /// Network failure or server-side error worth retrying.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The request was rejected; retrying will not help.
    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimit { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

impl From<HttpError> for LlmError {
    fn from(e: HttpError) -> Self {
        if e.is_rate_limited() {
            let retry_after = match &e {
                HttpError::Api { retry_after, .. } => *retry_after,
                _ => None,
            };
            LlmError::RateLimit { retry_after }
        } else if e.is_transient() {
            LlmError::Transient(e.to_string())
        } else {
            LlmError::Api(e.to_string())
        }
    }
}

/// A model endpoint that speaks the tool-use conversation protocol.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one turn (the full conversation so far) and return the model's reply.
    async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError>;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}
