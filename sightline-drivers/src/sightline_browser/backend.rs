use crate::sightline_browser::keys::KeyChord;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sightline_common::{Platform, Point, Size};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// An element as reported by the platform, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawElement {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// The primitives a platform has to provide. Validation, cursor tracking and
/// screenshot handling live in [`crate::Browser`]; implementations only talk
/// to the device.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Open `url` in a fresh page. On failure the new page must already be
    /// closed again.
    async fn open_page(&mut self, url: &str, timeout: Duration) -> Result<()>;

    async fn move_to(&mut self, at: Point) -> Result<()>;

    /// Press `button` `count` times at `at`.
    async fn click(&mut self, at: Point, button: MouseButton, count: u8) -> Result<()>;

    async fn drag(&mut self, from: Point, to: Point) -> Result<()>;

    async fn type_text(&mut self, text: &str) -> Result<()>;

    async fn press_chord(&mut self, chord: &KeyChord) -> Result<()>;

    /// Wait up to `timeout` for the first element matching the CSS
    /// `selector`, then replace its value with `text`.
    async fn fill(&mut self, selector: &str, text: &str, timeout: Duration) -> Result<()>;

    /// Innermost element at `at` followed by its ancestors, nearest first.
    async fn element_at(&mut self, at: Point) -> Result<Option<Vec<RawElement>>>;

    async fn screenshot_png(&mut self) -> Result<Vec<u8>>;

    async fn current_url(&mut self) -> Result<String>;

    async fn title(&mut self) -> Result<String>;

    async fn viewport(&mut self) -> Result<Size>;

    async fn clear_storage(&mut self) -> Result<()>;

    async fn reset_permissions(&mut self) -> Result<()>;

    /// Close every page except the first one.
    async fn close_extra_pages(&mut self) -> Result<()>;

    async fn blank(&mut self) -> Result<()>;

    async fn shutdown(&mut self) -> Result<()>;
}
