//! Executes parsed tool calls against the session's browser.
use crate::definition::{AssertionFailed, Callback, TestDefinition};
use crate::github;
use crate::mailosaur::MailosaurClient;
use crate::tools::{ComputerAction, ToolCall};
use base64::Engine as _;
use serde_json::{json, Value};
use sightline_common::{GithubConfig, Platform, SightlineConfig};
use sightline_drivers::{Browser, SessionHandle, ToolError};
use sightline_llm::{ContentBlock, ImageSource, ToolResultContent};
use std::sync::Arc;

/// Optional third-party services behind the auxiliary tools.
#[derive(Clone, Default)]
pub struct Integrations {
    pub github: Option<GithubConfig>,
    pub mailosaur: Option<Arc<MailosaurClient>>,
}

impl Integrations {
    pub fn from_config(config: &SightlineConfig) -> Result<Self, sightline_http::HttpError> {
        let mailosaur = match &config.mailosaur {
            Some(m) => Some(Arc::new(MailosaurClient::new(m)?)),
            None => None,
        };
        Ok(Self {
            github: config.github.clone(),
            mailosaur,
        })
    }
}

#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Image {
        data: String,
        media_type: String,
        text: String,
    },
}

/// Result of one tool call; failures are reported to the model, not raised.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: ToolOutput,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            output: ToolOutput::Text(text.into()),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            output: ToolOutput::Text(text.into()),
            is_error: true,
        }
    }

    fn from_tool_error(err: ToolError) -> Self {
        Self::error(err.to_string())
    }

    pub fn text(&self) -> &str {
        match &self.output {
            ToolOutput::Text(text) | ToolOutput::Image { text, .. } => text,
        }
    }

    /// Content of the `tool_result` block.
    pub fn to_content(&self) -> Vec<ToolResultContent> {
        match &self.output {
            ToolOutput::Text(text) => vec![ToolResultContent::Text { text: text.clone() }],
            ToolOutput::Image {
                data,
                media_type,
                text,
            } => vec![
                ToolResultContent::Image {
                    source: ImageSource::base64(media_type.clone(), data.clone()),
                },
                ToolResultContent::Text { text: text.clone() },
            ],
        }
    }

    pub fn to_block(&self, tool_use_id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: self.to_content(),
            is_error: self.is_error,
        }
    }

    /// Cache form: text only, image data is never stored.
    pub fn to_record(&self) -> Value {
        json!({ "output": self.text(), "is_error": self.is_error })
    }
}

/// Platform-keyed dispatcher from [`ToolCall`] to [`Browser`] operations.
pub struct Adapter {
    platform: Platform,
    session: SessionHandle,
    test: Arc<TestDefinition>,
    integrations: Integrations,
    callback_index: usize,
}

impl Adapter {
    pub fn new(
        platform: Platform,
        session: SessionHandle,
        test: Arc<TestDefinition>,
        integrations: Integrations,
    ) -> Self {
        Self {
            platform,
            session,
            test,
            integrations,
            callback_index: 0,
        }
    }

    pub fn callback_index(&self) -> usize {
        self.callback_index
    }

    /// Move past one `run_callback` step without running it.
    pub fn skip_callback(&mut self) {
        self.callback_index += 1;
    }

    pub async fn execute(&mut self, call: &ToolCall) -> ToolOutcome {
        match call {
            ToolCall::Computer(action) => self.computer(action).await,
            ToolCall::RunCallback => self.run_callback().await,
            ToolCall::Sleep { duration } => self.sleep(*duration).await,
            ToolCall::Navigate { url } => self.navigate(url).await,
            ToolCall::GithubLogin { username, password } => {
                self.github_login(username, password).await
            }
            ToolCall::CheckEmail { email } => self.check_email(email).await,
        }
    }

    async fn computer(&mut self, action: &ComputerAction) -> ToolOutcome {
        let xy = |c: &Option<[f64; 2]>| -> (Option<i64>, Option<i64>) {
            match c {
                Some([x, y]) => (Some(x.round() as i64), Some(y.round() as i64)),
                None => (None, None),
            }
        };

        let mut browser = self.session.lock().await;
        let result = match action {
            ComputerAction::Key { text } => browser.press_key(text).await,
            ComputerAction::Type { text } => browser.type_text(text).await,
            ComputerAction::MouseMove { coordinate } => {
                let (x, y) = xy(coordinate);
                browser.mouse_move(x, y).await
            }
            ComputerAction::LeftClick { coordinate } => {
                let (x, y) = xy(coordinate);
                browser.left_click(x, y).await
            }
            ComputerAction::LeftClickDrag { coordinate } => {
                let (x, y) = xy(coordinate);
                browser.drag(x, y).await
            }
            ComputerAction::RightClick { coordinate } => {
                let (x, y) = xy(coordinate);
                browser.right_click(x, y).await
            }
            ComputerAction::MiddleClick { coordinate } => {
                if self.platform.is_mobile() {
                    return ToolOutcome::error(format!(
                        "middle_click is not available on {}",
                        self.platform
                    ));
                }
                let (x, y) = xy(coordinate);
                browser.middle_click(x, y).await
            }
            ComputerAction::DoubleClick { coordinate } => {
                let (x, y) = xy(coordinate);
                browser.double_click(x, y).await
            }
            ComputerAction::Screenshot => return screenshot(&mut browser).await,
            ComputerAction::CursorPosition => browser.cursor_position().await,
            ComputerAction::Navigate { url } => {
                return match browser.navigate(url).await {
                    Ok(state) => ToolOutcome::ok(format!("Opened {url}. {}", state.describe())),
                    Err(e) => ToolOutcome::from_tool_error(e),
                }
            }
            ComputerAction::Sleep { duration } => browser.sleep(*duration).await,
            ComputerAction::RunCallback => {
                drop(browser);
                return self.run_callback().await;
            }
        };
        match result {
            Ok(out) => ToolOutcome::ok(format!("{}. {}", out.message, out.state.describe())),
            Err(e) => ToolOutcome::from_tool_error(e),
        }
    }

    async fn sleep(&mut self, duration: Option<u64>) -> ToolOutcome {
        match self.session.lock().await.sleep(duration).await {
            Ok(out) => ToolOutcome::ok(out.message),
            Err(e) => ToolOutcome::from_tool_error(e),
        }
    }

    async fn navigate(&mut self, url: &str) -> ToolOutcome {
        match self.session.lock().await.navigate(url).await {
            Ok(state) => ToolOutcome::ok(format!("Opened {url} in a new tab. {}", state.describe())),
            Err(e) => ToolOutcome::from_tool_error(e),
        }
    }

    /// Step 0 runs the main callback, step `i` the callback of expectation
    /// `i - 1`. Missing callbacks are a no-op; the index always advances.
    async fn run_callback(&mut self) -> ToolOutcome {
        let index = self.callback_index;
        self.callback_index += 1;

        let (label, cb): (String, Option<Callback>) = if index == 0 {
            ("main callback".to_string(), self.test.callback.clone())
        } else {
            match self.test.expectations.get(index - 1) {
                Some(exp) => (format!("callback for {:?}", exp.description), exp.callback.clone()),
                None => (format!("callback #{index}"), None),
            }
        };

        let Some(cb) = cb else {
            tracing::debug!(test = %self.test.name, index, "agent.callback.none");
            return ToolOutcome::ok(format!("No {label} to run; nothing to do."));
        };

        tracing::info!(test = %self.test.name, index, "agent.callback.run");
        let ctx = self.test.context(self.session.clone());
        match cb(ctx).await {
            Ok(()) => ToolOutcome::ok(format!("{label} completed successfully")),
            Err(e) => ToolOutcome::error(describe_callback_error(&label, &e)),
        }
    }

    /// Sign in on GitHub's own form, answering the two-factor prompt with a
    /// code computed right before it is entered. Replaying the step signs in
    /// again with a fresh code.
    async fn github_login(&mut self, username: &str, password: &str) -> ToolOutcome {
        let Some(github) = &self.integrations.github else {
            return ToolOutcome::error("GitHub login is not configured");
        };
        let Some(secret) = github.totp_secret.clone() else {
            return ToolOutcome::error("no GitHub TOTP secret configured");
        };
        let or_configured = |given: &str, configured: &str| {
            if given.is_empty() { configured } else { given }.to_string()
        };
        let username = or_configured(username, &github.username);
        let password = or_configured(password, &github.password);
        if let Err(e) = github::current_code(&username, &secret) {
            return ToolOutcome::error(e);
        }

        let mut browser = self.session.lock().await;
        let on_login_page = browser
            .state()
            .await
            .window
            .url
            .is_some_and(|url| url.starts_with(github::GITHUB_LOGIN_URL));
        if !on_login_page {
            if let Err(e) = browser.navigate(github::GITHUB_LOGIN_URL).await {
                return ToolOutcome::from_tool_error(e);
            }
        }
        if let Err(e) = sign_in(&mut browser, &username, &password, &secret).await {
            tracing::warn!(
                test = %self.test.name,
                %username,
                error = %e,
                "agent.github.login_failed"
            );
            return ToolOutcome::from_tool_error(e);
        }
        tracing::info!(test = %self.test.name, %username, "agent.github.signed_in");

        let text = format!("Submitted GitHub sign-in and two-factor code for {username}.");
        match screenshot(&mut browser).await {
            ToolOutcome {
                output: ToolOutput::Image {
                    data, media_type, ..
                },
                is_error: false,
            } => ToolOutcome {
                output: ToolOutput::Image {
                    data,
                    media_type,
                    text,
                },
                is_error: false,
            },
            _ => ToolOutcome::ok(text),
        }
    }

    async fn check_email(&mut self, email: &str) -> ToolOutcome {
        let Some(client) = self.integrations.mailosaur.clone() else {
            return ToolOutcome::error("email checking is not configured");
        };
        let message = match client.await_message(email).await {
            Ok(m) => m,
            Err(e) => return ToolOutcome::error(format!("no email for {email}: {e}")),
        };

        let encoded =
            base64::engine::general_purpose::STANDARD.encode(message.html_document().as_bytes());
        let url = format!("data:text/html;base64,{encoded}");
        let mut browser = self.session.lock().await;
        if let Err(e) = browser.navigate(&url).await {
            return ToolOutcome::error(format!("{}\n(could not render: {e})", message.summary()));
        }
        match screenshot(&mut browser).await {
            ToolOutcome {
                output: ToolOutput::Image {
                    data, media_type, ..
                },
                is_error: false,
            } => ToolOutcome {
                output: ToolOutput::Image {
                    data,
                    media_type,
                    text: message.summary(),
                },
                is_error: false,
            },
            _ => ToolOutcome::ok(message.summary()),
        }
    }
}

async fn sign_in(
    browser: &mut Browser,
    username: &str,
    password: &str,
    secret: &str,
) -> Result<(), ToolError> {
    browser.fill(github::LOGIN_FIELD, username).await?;
    browser.fill(github::PASSWORD_FIELD, password).await?;
    browser.press_key("Return").await?;
    let code = github::current_code(username, secret)
        .map_err(|e| ToolError::invalid(crate::tools::GITHUB_LOGIN_TOOL, e))?;
    browser.fill(github::OTP_FIELD, &code).await?;
    browser.press_key("Return").await?;
    Ok(())
}

async fn screenshot(browser: &mut Browser) -> ToolOutcome {
    match browser.screenshot().await {
        Ok(shot) => ToolOutcome {
            output: ToolOutput::Image {
                data: shot.data,
                media_type: shot.media_type.to_string(),
                text: shot.state.describe(),
            },
            is_error: false,
        },
        Err(e) => ToolOutcome::from_tool_error(e),
    }
}

fn describe_callback_error(label: &str, err: &anyhow::Error) -> String {
    match err.downcast_ref::<AssertionFailed>() {
        Some(a) => format!(
            "Assertion failed in {label}: {}\nExpected: {}\nActual: {}",
            a.message, a.expected, a.actual
        ),
        None => format!("{label} failed: {err:#}"),
    }
}
