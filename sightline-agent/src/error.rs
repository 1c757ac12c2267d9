use sightline_drivers::ToolError;
use sightline_llm::traits::LlmError;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    /// The model broke the conversation contract (no verdict, turn cap).
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported tool call `{name}`: {detail}")]
    UnsupportedTool { name: String, detail: String },

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("browser unavailable: {0}")]
    Browser(#[from] ToolError),
}
