//! LLM tool-use integration for Sightline.
//!
//! This crate exposes the [`traits::LlmClient`] interface the orchestrator
//! drives, the wire types of the conversation ([`messages`]) and the concrete
//! Anthropic Messages API client. [`ensure_llm_ready`] builds a client from an
//! [`sightline_common::AiConfig`].
//!
//! # Examples
//! ```no_run
//! use sightline_common::AiConfig;
//! use sightline_llm::ensure_llm_ready;
//!
//! let cfg = AiConfig {
//!     api_key: Some("sk-ant-...".into()),
//!     ..AiConfig::default()
//! };
//! let client = ensure_llm_ready(&cfg).unwrap();
//! assert_eq!(client.model_name(), "claude-3-5-sonnet-20241022");
//! ```
pub mod anthropic;
pub mod messages;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use anthropic::AnthropicClient;
use sightline_common::AiConfig;
use std::sync::Arc;
use traits::{LlmClient, LlmError};

pub use messages::{
    ContentBlock, ImageSource, Message, MessagesRequest, MessagesResponse, Role, ToolDefinition,
    ToolResultContent, ToolUse,
};

/// Build the configured LLM client; fails when no API key is available.
pub fn ensure_llm_ready(config: &AiConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            LlmError::Config(
                "no API key configured (set ai.api_key or ANTHROPIC_API_KEY)".to_string(),
            )
        })?;
    let client = AnthropicClient::new(api_key, config.model.clone(), &config.base_url)?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_a_config_error() {
        let err = ensure_llm_ready(&AiConfig::default()).err().unwrap();
        assert!(matches!(err, LlmError::Config(_)));
    }
}
