//! The model-driven tool-use loop for one test.
use crate::adapter::{Adapter, Integrations};
use crate::definition::TestDefinition;
use crate::error::AgentError;
use crate::tools::{tool_definitions, ToolCall};
use serde_json::Value;
use sightline_cache::{CacheStep, StepAction, StepExtras};
use sightline_common::observability::AI_TARGET;
use sightline_common::{AiConfig, BrowserState, Platform, Point, RetryConfig, Size};
use sightline_drivers::SessionHandle;
use sightline_llm::traits::{LlmClient, LlmError};
use sightline_llm::{ContentBlock, ImageSource, Message, MessagesRequest, MessagesResponse};
use std::sync::Arc;

/// Used for the computer tool when the backend cannot report a viewport.
pub const DEFAULT_DISPLAY: Size = Size {
    width: 1280,
    height: 800,
};

const SYSTEM_PROMPT: &str = "You are a QA engineer executing one end-to-end UI test. \
You control the application only through the tools provided, using screen coordinates \
taken from the screenshots you receive. Work step by step: look at the screen, act, \
then check the result with a fresh screenshot before moving on.

Rules:
- Follow the test description literally and verify every expectation in order.
- When the test has callbacks, call run_callback at the point it describes. The first \
call runs the main callback, later calls run the expectation callbacks in order.
- A tool result marked as an error means the action did not happen. Recover or fail \
the test; never pretend it succeeded.
- Do not ask questions. Nobody will answer.

When you are done, stop calling tools and end your final message with a JSON object \
on its own: {\"result\": \"pass\" | \"fail\", \"reason\": \"<one sentence>\"}.";

const MOBILE_NOTES: &str = "\n\nYou are driving a native mobile app. left_click is a tap, \
right_click a long press and left_click_drag a swipe from the current position. There is \
no middle click.";

/// Final decision of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

/// A finished live run: the verdict plus the steps that produced it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub verdict: Verdict,
    pub trace: Vec<CacheStep>,
    pub turns: usize,
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    ai: AiConfig,
    retry: RetryConfig,
    integrations: Integrations,
    display: Size,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, ai: AiConfig, retry: RetryConfig) -> Self {
        Self {
            llm,
            ai,
            retry,
            integrations: Integrations::default(),
            display: DEFAULT_DISPLAY,
        }
    }

    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }

    /// Fallback display size when the session cannot report one.
    pub fn with_display(mut self, display: Size) -> Self {
        self.display = display;
        self
    }

    /// Drive `test` to a verdict on `session`.
    ///
    /// Tool failures are returned to the model; only protocol violations,
    /// unrecoverable LLM errors and an unusable session end the run early.
    pub async fn run(
        &self,
        test: Arc<TestDefinition>,
        session: SessionHandle,
    ) -> Result<RunOutcome, AgentError> {
        let (platform, shot) = {
            let mut browser = session.lock().await;
            (browser.platform(), browser.screenshot().await?)
        };
        let display = shot.state.window.size.unwrap_or(self.display);

        let mut request = MessagesRequest {
            model: self.llm.model_name().to_string(),
            max_tokens: self.ai.max_tokens,
            system: system_prompt(platform),
            messages: vec![Message::user(vec![
                ContentBlock::Image {
                    source: ImageSource::base64(shot.media_type, shot.data),
                },
                ContentBlock::text(initial_prompt(&test, &shot.state)),
            ])],
            tools: tool_definitions(
                platform,
                display,
                self.integrations.github.is_some(),
                self.integrations.mailosaur.is_some(),
            ),
        };

        let mut adapter = Adapter::new(
            platform,
            session.clone(),
            test.clone(),
            self.integrations.clone(),
        );
        let mut trace = Vec::new();

        for turn in 1..=self.ai.max_turns {
            tracing::debug!(test = %test.name, turn, "agent.turn.start");
            let response = self.send(&request).await?;
            if self.ai.debug {
                log_response(&test.name, turn, &response);
            }
            request.messages.push(Message::assistant(response.content.clone()));

            let mut results = Vec::new();
            let mut reasoning: Option<String> = None;
            for block in &response.content {
                let (id, name, input) = match block {
                    ContentBlock::Text { text } => {
                        reasoning = Some(text.clone());
                        continue;
                    }
                    ContentBlock::ToolUse { id, name, input } => (id, name, input),
                    _ => continue,
                };
                let call = ToolCall::parse(name, input)?;
                let extras = capture_extras(&session, &call).await;
                let outcome = adapter.execute(&call).await;
                if outcome.is_error {
                    tracing::warn!(
                        test = %test.name,
                        action = call.label(),
                        error = outcome.text(),
                        "agent.tool.failed"
                    );
                }
                trace.push(CacheStep {
                    action: StepAction {
                        name: name.clone(),
                        input: input.clone(),
                    },
                    reasoning: reasoning.take(),
                    result: outcome.to_record(),
                    extras,
                    timestamp: sightline_common::now_millis(),
                });
                results.push(outcome.to_block(id));
            }

            if results.is_empty() {
                let text = response.last_text().unwrap_or_default();
                let verdict = parse_verdict(text)?;
                tracing::info!(
                    test = %test.name,
                    turns = turn,
                    passed = verdict.passed,
                    reason = %verdict.reason,
                    "agent.verdict"
                );
                return Ok(RunOutcome {
                    verdict,
                    trace,
                    turns: turn,
                });
            }
            request.messages.push(Message::user(results));
        }

        Err(AgentError::Protocol(format!(
            "no verdict after {} turns",
            self.ai.max_turns
        )))
    }

    /// One model call. Rate limits wait and resend without using up a retry;
    /// transient failures back off linearly up to `max_retries`.
    async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse, AgentError> {
        let mut attempt = 0;
        loop {
            match self.llm.send(request).await {
                Ok(response) => return Ok(response),
                Err(LlmError::RateLimit { retry_after }) => {
                    let wait = retry_after.unwrap_or_else(|| self.retry.rate_limit_cooldown());
                    tracing::warn!(wait_ms = wait.as_millis() as u64, "agent.llm.rate_limited");
                    tokio::time::sleep(wait).await;
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let wait = self.retry.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "agent.llm.retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn system_prompt(platform: Platform) -> String {
    if platform.is_mobile() {
        format!("{SYSTEM_PROMPT}{MOBILE_NOTES}")
    } else {
        SYSTEM_PROMPT.to_string()
    }
}

/// First user message: what to test and what the screen looks like now.
pub fn initial_prompt(test: &TestDefinition, state: &BrowserState) -> String {
    let mut prompt = format!("Test: {}\n", test.name);
    if let Some(payload) = &test.payload {
        let rendered =
            serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        prompt.push_str(&format!("\nTest data (JSON):\n{rendered}\n"));
    }
    if test.callback.is_some() {
        prompt.push_str(
            "\nThis test has a main callback. Call run_callback once when the test \
             description says the callback should run.\n",
        );
    }
    if !test.expectations.is_empty() {
        prompt.push_str("\nExpectations, in order:\n");
        for (i, exp) in test.expectations.iter().enumerate() {
            prompt.push_str(&format!("{}. {}", i + 1, exp.description));
            if exp.callback.is_some() {
                prompt.push_str(" (verify by calling run_callback)");
            }
            prompt.push('\n');
        }
    }
    prompt.push_str(&format!(
        "\nCurrent state: {}\nThe screenshot above shows the screen right now.",
        state.describe()
    ));
    prompt
}

/// Element fingerprint and position for pointer actions, taken before the
/// action runs.
async fn capture_extras(session: &SessionHandle, call: &ToolCall) -> StepExtras {
    if !call.is_pointer() {
        return StepExtras::default();
    }
    let mut browser = session.lock().await;
    let at = call
        .coordinate()
        .and_then(|(x, y)| Some(Point::new(u32::try_from(x).ok()?, u32::try_from(y).ok()?)))
        .or_else(|| browser.cursor());
    let Some(at) = at else {
        return StepExtras::default();
    };
    let fingerprint = match browser.locate_at(at.x as i64, at.y as i64).await {
        Ok(fp) => fp,
        Err(e) => {
            tracing::debug!(at = %at, error = %e, "agent.fingerprint.unavailable");
            None
        }
    };
    StepExtras {
        fingerprint,
        coordinates: Some(at),
    }
}

fn log_response(test: &str, turn: usize, response: &MessagesResponse) {
    for block in &response.content {
        match block {
            ContentBlock::Text { text } => {
                tracing::info!(target: AI_TARGET, test, turn, text = %text, "ai.text");
            }
            ContentBlock::ToolUse { name, input, .. } => {
                tracing::info!(target: AI_TARGET, test, turn, tool = %name, input = %input, "ai.tool_use");
            }
            _ => {}
        }
    }
}

/// Find the trailing `{"result": "pass"|"fail", "reason": ...}` object in the
/// model's final text. Trailing whitespace and code fences are tolerated.
pub fn parse_verdict(text: &str) -> Result<Verdict, AgentError> {
    let body = text.trim_end_matches(|c: char| c.is_whitespace() || c == '`');
    for (start, _) in body.rmatch_indices('{') {
        let tail = &body[start..];
        let mut stream = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        if stream.byte_offset() != tail.len() {
            continue;
        }
        let result = value.get("result").and_then(Value::as_str);
        let reason = value.get("reason").and_then(Value::as_str);
        match (result.map(str::to_ascii_lowercase).as_deref(), reason) {
            (Some("pass"), Some(reason)) => {
                return Ok(Verdict {
                    passed: true,
                    reason: reason.to_string(),
                })
            }
            (Some("fail"), Some(reason)) => {
                return Ok(Verdict {
                    passed: false,
                    reason: reason.to_string(),
                })
            }
            _ => continue,
        }
    }
    Err(AgentError::Protocol(format!(
        "final message has no verdict: {:?}",
        text.chars().take(200).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_is_read_from_the_end_of_the_text() {
        let v = parse_verdict(
            "The dashboard shows {user} correctly.\n```json\n{\"result\": \"pass\", \"reason\": \"Dashboard visible\"}\n```\n",
        )
        .unwrap();
        assert_eq!(
            v,
            Verdict {
                passed: true,
                reason: "Dashboard visible".into()
            }
        );

        let v = parse_verdict(r#"{"result": "FAIL", "reason": "button {missing}"}"#).unwrap();
        assert!(!v.passed);
        assert_eq!(v.reason, "button {missing}");
    }

    #[test]
    fn text_without_a_verdict_is_a_protocol_error() {
        for text in [
            "All done!",
            r#"{"result": "maybe", "reason": "?"}"#,
            r#"{"result": "pass"}"#,
            r#"{"result": "pass", "reason": "ok"} and then more words"#,
        ] {
            assert!(
                matches!(parse_verdict(text), Err(AgentError::Protocol(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn initial_prompt_lists_expectations_and_callbacks() {
        let test = TestDefinition::new("Checkout")
            .with_payload(json!({ "sku": "A-1" }))
            .expect("cart shows one item")
            .expect_with(
                "order is stored",
                crate::definition::callback(|_| async { Ok(()) }),
            );
        let prompt = initial_prompt(&test, &BrowserState::default());
        assert!(prompt.starts_with("Test: Checkout\n"));
        assert!(prompt.contains("\"sku\": \"A-1\""));
        assert!(prompt.contains("1. cart shows one item\n"));
        assert!(prompt.contains("2. order is stored (verify by calling run_callback)"));
        assert!(!prompt.contains("main callback"));
        assert!(prompt.contains("Current state: state unavailable"));
    }
}
