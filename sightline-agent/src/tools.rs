//! Tool schemas offered to the model and the typed calls parsed from its replies.
use crate::error::AgentError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sightline_common::{Platform, Size};
use sightline_llm::ToolDefinition;

pub const COMPUTER_TOOL: &str = "computer";
pub const RUN_CALLBACK_TOOL: &str = "run_callback";
pub const SLEEP_TOOL: &str = "sleep";
pub const NAVIGATE_TOOL: &str = "navigate";
pub const GITHUB_LOGIN_TOOL: &str = "github_login";
pub const CHECK_EMAIL_TOOL: &str = "check_email";

const COMPUTER_TOOL_TYPE: &str = "computer_20241022";

/// `[x, y]`; models occasionally send floats.
pub type Coordinate = [f64; 2];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ComputerAction {
    Key { text: String },
    Type { text: String },
    MouseMove { coordinate: Option<Coordinate> },
    LeftClick { coordinate: Option<Coordinate> },
    LeftClickDrag { coordinate: Option<Coordinate> },
    RightClick { coordinate: Option<Coordinate> },
    MiddleClick { coordinate: Option<Coordinate> },
    DoubleClick { coordinate: Option<Coordinate> },
    Screenshot,
    CursorPosition,
    Navigate { url: String },
    Sleep { duration: Option<u64> },
    RunCallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Computer(ComputerAction),
    RunCallback,
    Sleep { duration: Option<u64> },
    Navigate { url: String },
    GithubLogin { username: String, password: String },
    CheckEmail { email: String },
}

#[derive(Deserialize)]
struct SleepInput {
    duration: Option<u64>,
}

#[derive(Deserialize)]
struct NavigateInput {
    url: String,
}

#[derive(Deserialize)]
struct GithubLoginInput {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct CheckEmailInput {
    email: String,
}

fn input<T: DeserializeOwned>(name: &str, raw: &Value) -> Result<T, AgentError> {
    serde_json::from_value(raw.clone()).map_err(|e| AgentError::UnsupportedTool {
        name: name.to_string(),
        detail: format!("bad input {raw}: {e}"),
    })
}

impl ToolCall {
    /// Parse one `tool_use` block. Unknown tools and malformed inputs are errors.
    pub fn parse(name: &str, raw: &Value) -> Result<ToolCall, AgentError> {
        let call = match name {
            COMPUTER_TOOL => ToolCall::Computer(input(name, raw)?),
            RUN_CALLBACK_TOOL => ToolCall::RunCallback,
            SLEEP_TOOL => {
                let i: SleepInput = input(name, raw)?;
                ToolCall::Sleep { duration: i.duration }
            }
            NAVIGATE_TOOL => {
                let i: NavigateInput = input(name, raw)?;
                ToolCall::Navigate { url: i.url }
            }
            GITHUB_LOGIN_TOOL => {
                let i: GithubLoginInput = input(name, raw)?;
                ToolCall::GithubLogin {
                    username: i.username,
                    password: i.password,
                }
            }
            CHECK_EMAIL_TOOL => {
                let i: CheckEmailInput = input(name, raw)?;
                ToolCall::CheckEmail { email: i.email }
            }
            other => {
                return Err(AgentError::UnsupportedTool {
                    name: other.to_string(),
                    detail: "no such tool".to_string(),
                })
            }
        };
        Ok(call)
    }

    /// Whether the call acts at a screen position (explicit or the cursor).
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            ToolCall::Computer(
                ComputerAction::MouseMove { .. }
                    | ComputerAction::LeftClick { .. }
                    | ComputerAction::LeftClickDrag { .. }
                    | ComputerAction::RightClick { .. }
                    | ComputerAction::MiddleClick { .. }
                    | ComputerAction::DoubleClick { .. }
            )
        )
    }

    /// Explicit coordinate, rounded to whole pixels.
    pub fn coordinate(&self) -> Option<(i64, i64)> {
        let c = match self {
            ToolCall::Computer(
                ComputerAction::MouseMove { coordinate }
                | ComputerAction::LeftClick { coordinate }
                | ComputerAction::LeftClickDrag { coordinate }
                | ComputerAction::RightClick { coordinate }
                | ComputerAction::MiddleClick { coordinate }
                | ComputerAction::DoubleClick { coordinate },
            ) => coordinate.as_ref()?,
            _ => return None,
        };
        Some((c[0].round() as i64, c[1].round() as i64))
    }

    /// `run_callback`, in either its auxiliary or its `computer` form.
    pub fn is_callback(&self) -> bool {
        matches!(
            self,
            ToolCall::RunCallback | ToolCall::Computer(ComputerAction::RunCallback)
        )
    }

    pub fn is_screenshot(&self) -> bool {
        matches!(self, ToolCall::Computer(ComputerAction::Screenshot))
    }

    /// Action name for logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            ToolCall::Computer(action) => match action {
                ComputerAction::Key { .. } => "key",
                ComputerAction::Type { .. } => "type",
                ComputerAction::MouseMove { .. } => "mouse_move",
                ComputerAction::LeftClick { .. } => "left_click",
                ComputerAction::LeftClickDrag { .. } => "left_click_drag",
                ComputerAction::RightClick { .. } => "right_click",
                ComputerAction::MiddleClick { .. } => "middle_click",
                ComputerAction::DoubleClick { .. } => "double_click",
                ComputerAction::Screenshot => "screenshot",
                ComputerAction::CursorPosition => "cursor_position",
                ComputerAction::Navigate { .. } => "navigate",
                ComputerAction::Sleep { .. } => "sleep",
                ComputerAction::RunCallback => "run_callback",
            },
            ToolCall::RunCallback => RUN_CALLBACK_TOOL,
            ToolCall::Sleep { .. } => SLEEP_TOOL,
            ToolCall::Navigate { .. } => NAVIGATE_TOOL,
            ToolCall::GithubLogin { .. } => GITHUB_LOGIN_TOOL,
            ToolCall::CheckEmail { .. } => CHECK_EMAIL_TOOL,
        }
    }
}

fn mobile_computer_tool() -> ToolDefinition {
    ToolDefinition::Custom {
        name: COMPUTER_TOOL.to_string(),
        description: "Control the device screen. Coordinates are device pixels; \
            left_click is a tap, right_click a long press, left_click_drag a swipe \
            from the current position."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": [
                        "key", "type", "mouse_move", "left_click", "left_click_drag",
                        "right_click", "double_click", "screenshot", "cursor_position",
                        "navigate", "sleep", "run_callback"
                    ]
                },
                "coordinate": {
                    "type": "array",
                    "items": { "type": "number" },
                    "minItems": 2,
                    "maxItems": 2
                },
                "text": { "type": "string" },
                "url": { "type": "string" },
                "duration": { "type": "integer", "minimum": 0, "maximum": 60000 }
            },
            "required": ["action"]
        }),
    }
}

/// Tools for `platform`; the login and email tools are only offered when
/// their integration is configured.
pub fn tool_definitions(
    platform: Platform,
    display: Size,
    github: bool,
    mailosaur: bool,
) -> Vec<ToolDefinition> {
    let computer = if platform.is_mobile() {
        mobile_computer_tool()
    } else {
        ToolDefinition::Computer {
            kind: COMPUTER_TOOL_TYPE.to_string(),
            name: COMPUTER_TOOL.to_string(),
            display_width_px: display.width,
            display_height_px: display.height,
            display_number: 1,
        }
    };

    let mut tools = vec![
        computer,
        ToolDefinition::Custom {
            name: RUN_CALLBACK_TOOL.to_string(),
            description: "Run the next test callback: the first call runs the main \
                test callback, later calls run the expectation callbacks in order."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "action": { "type": "string", "enum": ["run_callback"] } },
                "required": ["action"]
            }),
        },
        ToolDefinition::Custom {
            name: SLEEP_TOOL.to_string(),
            description: "Wait for the page to settle.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["sleep"] },
                    "duration": { "type": "integer", "minimum": 0, "maximum": 60000 }
                },
                "required": ["action", "duration"]
            }),
        },
        ToolDefinition::Custom {
            name: NAVIGATE_TOOL.to_string(),
            description: "Open a URL in a new tab.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["navigate"] },
                    "url": { "type": "string" }
                },
                "required": ["action", "url"]
            }),
        },
    ];

    if github {
        tools.push(ToolDefinition::Custom {
            name: GITHUB_LOGIN_TOOL.to_string(),
            description: "Sign in on GitHub's login page, including the two-factor \
                prompt. Use it when the app redirects to GitHub to log in; omit \
                username and password to use the configured account."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["github_login"] },
                    "username": { "type": "string" },
                    "password": { "type": "string" }
                },
                "required": ["action"]
            }),
        });
    }
    if mailosaur {
        tools.push(ToolDefinition::Custom {
            name: CHECK_EMAIL_TOOL.to_string(),
            description: "Wait for the latest email sent to an address and open it in a new tab."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["check_email"] },
                    "email": { "type": "string" }
                },
                "required": ["action", "email"]
            }),
        });
    }
    tools
}
