//! Driver layer for AI-driven UI testing.
//!
//! Exposes one platform-agnostic action surface over web (chromedriver) and
//! mobile (Appium) WebDriver sessions.
//!
//! - [`sightline_browser::browser::Browser`]: coordinate actions, screenshots, state and cleanup
//! - [`sightline_browser::driver::Driver`]: WebDriver server lifecycle and session factory
//! - [`sightline_browser::backend::BrowserBackend`]: the primitives a platform must provide
//! - [`sightline_browser::fingerprint`]: element fingerprints used for stale-cache detection
pub mod sightline_browser;

pub use sightline_browser::backend::{BrowserBackend, MouseButton, RawElement};
pub use sightline_browser::browser::{
    ActionOutput, Browser, BrowserOptions, NavigateOptions, Screenshot,
};
pub use sightline_browser::driver::{Driver, Session, SessionFactory, SessionHandle, SessionState};
pub use sightline_browser::error::{DriverError, ToolError};
pub use sightline_browser::keys::{KeyChord, KeyName};
