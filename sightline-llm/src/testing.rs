//! A scripted [`LlmClient`] for tests: replies are queued up front and every
//! request is kept for inspection.
use crate::messages::{ContentBlock, MessagesRequest, MessagesResponse, Usage};
use crate::traits::{LlmClient, LlmError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<MessagesResponse, LlmError>>,
    requests: Vec<MessagesRequest>,
}

#[derive(Clone, Default)]
pub struct ScriptedLlm {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn push(&self, reply: Result<MessagesResponse, LlmError>) -> &Self {
        self.lock().replies.push_back(reply);
        self
    }

    pub fn push_blocks(&self, content: Vec<ContentBlock>) -> &Self {
        self.push(Ok(response(content)))
    }

    /// Queue a turn with optional reasoning text followed by one tool call.
    pub fn push_tool(&self, reasoning: Option<&str>, name: &str, input: Value) -> &Self {
        let id = format!("toolu_{}", self.lock().replies.len() + 1);
        let mut content = Vec::new();
        if let Some(text) = reasoning {
            content.push(ContentBlock::text(text));
        }
        content.push(ContentBlock::ToolUse {
            id,
            name: name.to_string(),
            input,
        });
        self.push_blocks(content)
    }

    /// Queue a final turn carrying a `{result, reason}` verdict.
    pub fn push_verdict(&self, passed: bool, reason: &str) -> &Self {
        let verdict = serde_json::json!({
            "result": if passed { "pass" } else { "fail" },
            "reason": reason,
        });
        self.push_blocks(vec![ContentBlock::text(format!("Done.\n{verdict}"))])
    }

    pub fn push_error(&self, err: LlmError) -> &Self {
        self.push(Err(err))
    }

    pub fn requests(&self) -> Vec<MessagesRequest> {
        self.lock().requests.clone()
    }

    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }
}

pub fn response(content: Vec<ContentBlock>) -> MessagesResponse {
    let stop_reason = if content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    {
        "tool_use"
    } else {
        "end_turn"
    };
    MessagesResponse {
        id: "msg_scripted".to_string(),
        model: "scripted".to_string(),
        content,
        stop_reason: Some(stop_reason.to_string()),
        usage: Usage::default(),
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse, LlmError> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        script
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Api("script exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
