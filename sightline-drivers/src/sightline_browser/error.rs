use sightline_common::Point;

/// Failure of a single browser action. Reported back to the model as an
/// `is_error` tool result rather than aborting the test.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("{action}: invalid coordinates: {detail}")]
    InvalidCoordinates { action: String, detail: String },

    #[error("{action}: {detail}")]
    InvalidInput { action: String, detail: String },

    #[error("{action} at {at} failed: {message}")]
    ActionFailed {
        action: String,
        at: Point,
        message: String,
    },

    #[error("{action} failed: {message}")]
    Backend { action: String, message: String },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("browser session has been destroyed")]
    Destroyed,
}

impl ToolError {
    pub fn invalid(action: &str, detail: impl Into<String>) -> Self {
        ToolError::InvalidInput {
            action: action.to_string(),
            detail: detail.into(),
        }
    }

    pub fn coordinates(action: &str, detail: impl Into<String>) -> Self {
        ToolError::InvalidCoordinates {
            action: action.to_string(),
            detail: detail.into(),
        }
    }

    pub fn backend(action: &str, err: impl std::fmt::Display) -> Self {
        ToolError::Backend {
            action: action.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("failed to launch {binary}: {message}")]
    Launch { binary: String, message: String },

    #[error("driver install command failed: {0}")]
    Install(String),

    #[error("could not open a WebDriver session at {url}: {message}")]
    Session { url: String, message: String },

    #[error("driver is not launched")]
    NotLaunched,

    #[error("driver has been destroyed")]
    Destroyed,
}
