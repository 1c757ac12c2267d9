use crate::messages::{MessagesRequest, MessagesResponse};
use crate::traits::{LlmClient, LlmError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sightline_http::{Auth, HttpClient, RequestOpts};
use std::time::Duration;

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const COMPUTER_USE_BETA: &str = "computer-use-2024-10-22";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct AnthropicClient {
    client: HttpClient,
    api_key: HeaderValue,
    model: String,
}

impl AnthropicClient {
    /// Create a client for `model`, talking to `base_url` (normally [`ANTHROPIC_API_BASE`]).
    ///
    /// The HTTP layer does not retry: the orchestrator owns the retry and
    /// rate-limit policy so a cooldown never restarts a conversation twice.
    pub fn new(api_key: &str, model: impl Into<String>, base_url: &str) -> Result<Self, LlmError> {
        let client = HttpClient::new(base_url)
            .map_err(|e| LlmError::Config(format!("HttpClient init failed: {e}")))?
            .with_timeout(REQUEST_TIMEOUT)
            .with_retries(0);
        let api_key = HeaderValue::from_str(api_key.trim())
            .map_err(|e| LlmError::Config(format!("invalid API key: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(
            HeaderName::from_static("anthropic-beta"),
            HeaderValue::from_static(COMPUTER_USE_BETA),
        );
        headers
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "llm.anthropic.send"
        );

        let opts = RequestOpts {
            auth: Some(Auth::Header {
                name: HeaderName::from_static("x-api-key"),
                value: self.api_key.clone(),
            }),
            headers: Some(self.headers()),
            ..Default::default()
        };

        let resp: MessagesResponse = self.client.post_json("messages", request, opts).await?;

        tracing::debug!(
            id = %resp.id,
            stop_reason = ?resp.stop_reason,
            input_tokens = resp.usage.input_tokens,
            output_tokens = resp.usage.output_tokens,
            "llm.anthropic.reply"
        );
        Ok(resp)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
