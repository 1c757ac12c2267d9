use crate::sightline_browser::backend::{BrowserBackend, MouseButton};
use crate::sightline_browser::error::ToolError;
use crate::sightline_browser::fingerprint::fingerprint_from_chain;
use crate::sightline_browser::keys::KeyChord;
use crate::sightline_browser::screenshots::{ScreenshotStore, JPEG_MEDIA_TYPE};
use sightline_common::{
    BrowserConfig, BrowserState, CursorState, Fingerprint, Platform, Point, ScreenshotConfig,
    WindowState,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub default_sleep: Duration,
    pub max_sleep: Duration,
    pub navigation_timeout: Duration,
    pub screenshots: ScreenshotConfig,
}

impl BrowserOptions {
    pub fn from_config(browser: &BrowserConfig, screenshots: &ScreenshotConfig) -> Self {
        Self {
            default_sleep: Duration::from_millis(browser.default_sleep_ms),
            max_sleep: Duration::from_millis(browser.max_sleep_ms),
            navigation_timeout: browser.navigation_timeout(),
            screenshots: screenshots.clone(),
        }
    }
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self::from_config(&BrowserConfig::default(), &ScreenshotConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NavigateOptions {
    /// Overrides the configured navigation timeout.
    pub timeout: Option<Duration>,
    /// Extra settle time after the page loaded.
    pub wait_after: Option<Duration>,
}

/// Result of a non-visual action.
#[derive(Debug, Clone)]
pub struct ActionOutput {
    pub message: String,
    pub state: BrowserState,
}

#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Base64 JPEG.
    pub data: String,
    pub media_type: &'static str,
    pub path: Option<PathBuf>,
    pub state: BrowserState,
}

/// Uniform, coordinate-based action surface over one backend session.
///
/// Actions without coordinates fall back to the last known cursor position.
/// Once destroyed, every call fails with [`ToolError::Destroyed`].
pub struct Browser {
    backend: Box<dyn BrowserBackend>,
    platform: Platform,
    cursor: Option<Point>,
    screenshots: ScreenshotStore,
    options: BrowserOptions,
    destroyed: bool,
}

impl Browser {
    pub fn new(backend: Box<dyn BrowserBackend>, options: BrowserOptions) -> Self {
        Self {
            platform: backend.platform(),
            backend,
            cursor: None,
            screenshots: ScreenshotStore::new(&options.screenshots),
            options,
            destroyed: false,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn cursor(&self) -> Option<Point> {
        self.cursor
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn ensure_alive(&self) -> Result<(), ToolError> {
        if self.destroyed {
            Err(ToolError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn resolve(&self, action: &str, x: Option<i64>, y: Option<i64>) -> Result<Point, ToolError> {
        match (x, y) {
            (Some(x), Some(y)) => {
                let coord = |v: i64| u32::try_from(v).ok();
                match (coord(x), coord(y)) {
                    (Some(x), Some(y)) => Ok(Point::new(x, y)),
                    _ => Err(ToolError::coordinates(
                        action,
                        format!("coordinates ({x}, {y}) must be non-negative integers"),
                    )),
                }
            }
            _ => match self.cursor {
                Some(p) => {
                    tracing::warn!(action, cursor = %p, "browser.coordinates.fallback_to_cursor");
                    Ok(p)
                }
                None => Err(ToolError::coordinates(
                    action,
                    "no coordinates given and no known cursor position",
                )),
            },
        }
    }

    /// Best-effort snapshot; missing fields stay `None`.
    pub async fn state(&mut self) -> BrowserState {
        let url = match self.backend.current_url().await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!(error = %e, "browser.state.url_unavailable");
                None
            }
        };
        let title = self.backend.title().await.ok();
        let size = self.backend.viewport().await.ok();
        BrowserState {
            window: WindowState { url, title, size },
            cursor: CursorState {
                position: self.cursor,
            },
        }
    }

    async fn output(&mut self, message: String) -> ActionOutput {
        let state = self.state().await;
        ActionOutput { message, state }
    }

    /// Open `url` in a fresh page. A failed navigation leaves no page behind.
    pub async fn navigate(&mut self, url: &str) -> Result<BrowserState, ToolError> {
        self.navigate_with(url, NavigateOptions::default()).await
    }

    pub async fn navigate_with(
        &mut self,
        url: &str,
        opts: NavigateOptions,
    ) -> Result<BrowserState, ToolError> {
        self.ensure_alive()?;
        let parsed = url::Url::parse(url).map_err(|e| ToolError::invalid("navigate", format!("{url:?}: {e}")))?;
        tracing::info!(url = %parsed, "browser.navigate");
        self.backend
            .open_page(
                parsed.as_str(),
                opts.timeout.unwrap_or(self.options.navigation_timeout),
            )
            .await
            .map_err(|e| ToolError::Navigation {
                url: url.to_string(),
                message: format!("{e:#}"),
            })?;
        if let Some(wait) = opts.wait_after {
            tokio::time::sleep(wait.min(self.options.max_sleep)).await;
        }
        Ok(self.state().await)
    }

    pub async fn click(
        &mut self,
        x: Option<i64>,
        y: Option<i64>,
        button: MouseButton,
        count: u8,
    ) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let action = match (button, count) {
            (MouseButton::Left, 2) => "double_click",
            (MouseButton::Left, _) => "left_click",
            (MouseButton::Middle, _) => "middle_click",
            (MouseButton::Right, _) => "right_click",
        };
        let at = self.resolve(action, x, y)?;
        self.backend
            .click(at, button, count)
            .await
            .map_err(|e| ToolError::ActionFailed {
                action: action.to_string(),
                at,
                message: format!("{e:#}"),
            })?;
        self.cursor = Some(at);
        Ok(self.output(format!("{action} at {at}")).await)
    }

    pub async fn left_click(&mut self, x: Option<i64>, y: Option<i64>) -> Result<ActionOutput, ToolError> {
        self.click(x, y, MouseButton::Left, 1).await
    }

    pub async fn double_click(&mut self, x: Option<i64>, y: Option<i64>) -> Result<ActionOutput, ToolError> {
        self.click(x, y, MouseButton::Left, 2).await
    }

    pub async fn right_click(&mut self, x: Option<i64>, y: Option<i64>) -> Result<ActionOutput, ToolError> {
        self.click(x, y, MouseButton::Right, 1).await
    }

    pub async fn middle_click(&mut self, x: Option<i64>, y: Option<i64>) -> Result<ActionOutput, ToolError> {
        self.click(x, y, MouseButton::Middle, 1).await
    }

    pub async fn mouse_move(&mut self, x: Option<i64>, y: Option<i64>) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let at = self.resolve("mouse_move", x, y)?;
        self.backend
            .move_to(at)
            .await
            .map_err(|e| ToolError::ActionFailed {
                action: "mouse_move".to_string(),
                at,
                message: format!("{e:#}"),
            })?;
        self.cursor = Some(at);
        Ok(self.output(format!("moved to {at}")).await)
    }

    /// Drag from the current cursor position to `(x, y)`.
    pub async fn drag(&mut self, x: Option<i64>, y: Option<i64>) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let from = self.cursor.ok_or_else(|| {
            ToolError::coordinates("left_click_drag", "drag needs a known cursor position to start from")
        })?;
        let to = self.resolve("left_click_drag", x, y)?;
        self.backend
            .drag(from, to)
            .await
            .map_err(|e| ToolError::ActionFailed {
                action: "left_click_drag".to_string(),
                at: to,
                message: format!("{e:#}"),
            })?;
        self.cursor = Some(to);
        Ok(self.output(format!("dragged from {from} to {to}")).await)
    }

    pub async fn type_text(&mut self, text: &str) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        self.backend
            .type_text(text)
            .await
            .map_err(|e| ToolError::backend("type", format!("{e:#}")))?;
        Ok(self.output(format!("typed {} characters", text.chars().count())).await)
    }

    /// Replace the value of the form field matching the CSS `selector`. The
    /// text is not logged.
    pub async fn fill(&mut self, selector: &str, text: &str) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let timeout = self.options.navigation_timeout;
        self.backend
            .fill(selector, text, timeout)
            .await
            .map_err(|e| ToolError::backend("fill", format!("{e:#}")))?;
        Ok(self.output(format!("filled {selector}")).await)
    }

    /// Press a key or a whitespace separated sequence of chords (`ctrl+a Delete`).
    pub async fn press_key(&mut self, keys: &str) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let chords = KeyChord::parse_sequence(keys).map_err(|e| ToolError::invalid("key", e))?;
        for chord in &chords {
            self.backend
                .press_chord(chord)
                .await
                .map_err(|e| ToolError::backend("key", format!("{chord}: {e:#}")))?;
        }
        Ok(self.output(format!("pressed {keys}")).await)
    }

    pub async fn screenshot(&mut self) -> Result<Screenshot, ToolError> {
        self.ensure_alive()?;
        let png = self
            .backend
            .screenshot_png()
            .await
            .map_err(|e| ToolError::backend("screenshot", format!("{e:#}")))?;
        let shot = self
            .screenshots
            .save(png)
            .await
            .map_err(|e| ToolError::backend("screenshot", format!("{e:#}")))?;
        let state = self.state().await;
        Ok(Screenshot {
            data: shot.base64,
            media_type: JPEG_MEDIA_TYPE,
            path: shot.path,
            state,
        })
    }

    pub async fn cursor_position(&mut self) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let message = match self.cursor {
            Some(p) => format!("cursor at {p}"),
            None => "cursor position unknown".to_string(),
        };
        Ok(self.output(message).await)
    }

    /// Sleep for `ms` (default when absent), clamped to the configured maximum.
    pub async fn sleep(&mut self, ms: Option<u64>) -> Result<ActionOutput, ToolError> {
        self.ensure_alive()?;
        let requested = ms.map(Duration::from_millis).unwrap_or(self.options.default_sleep);
        let effective = requested.min(self.options.max_sleep);
        if effective < requested {
            tracing::debug!(
                requested_ms = requested.as_millis() as u64,
                max_ms = self.options.max_sleep.as_millis() as u64,
                "browser.sleep.clamped"
            );
        }
        tokio::time::sleep(effective).await;
        Ok(self.output(format!("slept {}ms", effective.as_millis())).await)
    }

    /// Fingerprint of the element at `(x, y)`, `None` when nothing is there.
    pub async fn locate_at(&mut self, x: i64, y: i64) -> Result<Option<Fingerprint>, ToolError> {
        self.ensure_alive()?;
        let at = self.resolve("locate", Some(x), Some(y))?;
        let chain = self
            .backend
            .element_at(at)
            .await
            .map_err(|e| ToolError::ActionFailed {
                action: "locate".to_string(),
                at,
                message: format!("{e:#}"),
            })?;
        Ok(chain.and_then(|c| fingerprint_from_chain(&c, self.platform)))
    }

    /// Reset the session for the next test: storage, permissions, extra
    /// pages and the current page. Each step is best effort.
    pub async fn cleanup(&mut self) -> Result<(), ToolError> {
        self.ensure_alive()?;
        let steps = [
            ("clear_storage", self.backend.clear_storage().await),
            ("reset_permissions", self.backend.reset_permissions().await),
            ("close_extra_pages", self.backend.close_extra_pages().await),
            ("blank", self.backend.blank().await),
        ];
        for (step, result) in steps {
            if let Err(e) = result {
                tracing::warn!(step, error = %e, "browser.cleanup.step_failed");
            }
        }
        self.cursor = None;
        Ok(())
    }

    /// Release the device session. Idempotent.
    pub async fn destroy(&mut self) -> Result<(), ToolError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.cursor = None;
        self.backend
            .shutdown()
            .await
            .map_err(|e| ToolError::backend("destroy", format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sightline_browser::testing::FakeDevice;

    fn browser(device: &FakeDevice) -> (Browser, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let options = BrowserOptions {
            default_sleep: Duration::from_millis(5),
            max_sleep: Duration::from_millis(20),
            navigation_timeout: Duration::from_secs(1),
            screenshots: ScreenshotConfig {
                dir: dir.path().to_path_buf(),
                ..ScreenshotConfig::default()
            },
        };
        (Browser::new(Box::new(device.backend(Platform::Web)), options), dir)
    }

    #[tokio::test]
    async fn click_without_coordinates_uses_last_cursor() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);

        b.left_click(Some(10), Some(20)).await.unwrap();
        let out = b.left_click(None, None).await.unwrap();

        assert_eq!(out.state.cursor.position, Some(Point::new(10, 20)));
        assert_eq!(device.count("click left"), 2);
        assert_eq!(device.actions()[1], "click leftx1 10,20");
    }

    #[tokio::test]
    async fn click_without_any_position_is_rejected() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        let err = b.left_click(None, Some(3)).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidCoordinates { .. }));
        assert!(device.actions().is_empty());
    }

    #[tokio::test]
    async fn negative_coordinates_are_rejected() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        assert!(b.mouse_move(Some(-1), Some(5)).await.is_err());
        assert_eq!(b.cursor(), None);
    }

    #[tokio::test]
    async fn drag_starts_at_cursor() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        assert!(b.drag(Some(5), Some(5)).await.is_err());
        b.mouse_move(Some(1), Some(2)).await.unwrap();
        b.drag(Some(30), Some(40)).await.unwrap();
        assert!(device.actions().contains(&"drag 1,2->30,40".to_string()));
        assert_eq!(b.cursor(), Some(Point::new(30, 40)));
    }

    #[tokio::test]
    async fn fill_targets_a_selector_and_keeps_the_text_out_of_the_message() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        let out = b.fill("#password", "hunter2").await.unwrap();
        assert_eq!(out.message, "filled #password");
        assert_eq!(device.actions(), vec!["fill #password=hunter2".to_string()]);

        device.fail("fill");
        let err = b.fill("#otp", "123456").await.unwrap_err();
        assert!(matches!(err, ToolError::Backend { .. }));
    }

    #[tokio::test]
    async fn sleep_is_clamped_to_maximum() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        let out = b.sleep(Some(60_000)).await.unwrap();
        assert_eq!(out.message, "slept 20ms");
        let out = b.sleep(None).await.unwrap();
        assert_eq!(out.message, "slept 5ms");
    }

    #[tokio::test]
    async fn state_is_best_effort() {
        let device = FakeDevice::new();
        device.fail("url");
        let (mut b, _dir) = browser(&device);
        let state = b.state().await;
        assert!(state.window.url.is_none());
        assert!(state.window.size.is_some());
    }

    #[tokio::test]
    async fn navigation_failure_is_a_tool_error() {
        let device = FakeDevice::new();
        device.fail("open");
        let (mut b, _dir) = browser(&device);
        let err = b.navigate("https://example.com").await.unwrap_err();
        assert!(matches!(err, ToolError::Navigation { .. }));
        assert!(matches!(
            b.navigate("not a url").await.unwrap_err(),
            ToolError::InvalidInput { .. }
        ));
    }

    #[tokio::test]
    async fn screenshot_returns_jpeg_and_state() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        b.navigate("https://example.com/login").await.unwrap();
        let shot = b.screenshot().await.unwrap();
        assert_eq!(shot.media_type, "image/jpeg");
        assert!(!shot.data.is_empty());
        assert_eq!(
            shot.state.window.url.as_deref(),
            Some("https://example.com/login")
        );
    }

    #[tokio::test]
    async fn key_sequences_press_each_chord() {
        let device = FakeDevice::new();
        let (mut b, _dir) = browser(&device);
        b.press_key("ctrl+a Delete").await.unwrap();
        assert_eq!(device.count("key"), 2);
        assert!(b.press_key("hyper+q").await.is_err());
    }

    #[tokio::test]
    async fn locate_at_normalizes_the_chain() {
        let device = FakeDevice::new();
        device.put_element(Point::new(50, 60), "BUTTON", "submit");
        let (mut b, _dir) = browser(&device);
        let fp = b.locate_at(50, 60).await.unwrap().unwrap();
        assert_eq!(fp.render(), r#"form > button[id="submit"]"#);
        assert!(b.locate_at(1, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_continues_past_failures_and_destroy_is_final() {
        let device = FakeDevice::new();
        device.fail("reset_permissions");
        let (mut b, _dir) = browser(&device);
        b.navigate("https://example.com").await.unwrap();
        b.cleanup().await.unwrap();
        assert_eq!(device.count("blank"), 1);
        assert_eq!(device.pages(), 1);

        b.destroy().await.unwrap();
        b.destroy().await.unwrap();
        assert_eq!(device.count("shutdown"), 1);
        assert!(matches!(
            b.left_click(Some(1), Some(1)).await.unwrap_err(),
            ToolError::Destroyed
        ));
    }
}
