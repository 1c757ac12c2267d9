//! In-memory backend for exercising the action surface without a browser.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream crates' tests.
use crate::sightline_browser::backend::{BrowserBackend, MouseButton, RawElement};
use crate::sightline_browser::keys::KeyChord;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{ImageOutputFormat, RgbImage};
use sightline_common::{Platform, Point, Size};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FakeState {
    pub actions: Vec<String>,
    pub elements: HashMap<Point, Vec<RawElement>>,
    pub url: String,
    pub title: String,
    pub failing: HashSet<String>,
    pub pages: usize,
    pub shut_down: bool,
}

/// Shared handle onto a fake device; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        {
            let mut s = device.lock();
            s.url = "about:blank".to_string();
            s.pages = 1;
        }
        device
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn backend(&self, platform: Platform) -> FakeBackend {
        FakeBackend {
            device: self.clone(),
            platform,
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.lock().actions.clear();
    }

    /// Count recorded actions starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .actions
            .iter()
            .filter(|a| a.starts_with(prefix))
            .count()
    }

    /// Place an element (with `id`) at `at`, inside a `form`.
    pub fn put_element(&self, at: Point, tag: &str, id: &str) {
        let chain = vec![
            RawElement {
                tag: tag.to_string(),
                attributes: BTreeMap::from([("id".to_string(), id.to_string())]),
            },
            RawElement {
                tag: "form".to_string(),
                attributes: BTreeMap::new(),
            },
        ];
        self.lock().elements.insert(at, chain);
    }

    pub fn remove_element(&self, at: Point) {
        self.lock().elements.remove(&at);
    }

    /// Make every primitive whose name is `op` fail.
    pub fn fail(&self, op: &str) {
        self.lock().failing.insert(op.to_string());
    }

    pub fn pages(&self) -> usize {
        self.lock().pages
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

pub struct FakeBackend {
    device: FakeDevice,
    platform: Platform,
}

impl FakeBackend {
    fn record(&self, op: &str, detail: String) -> Result<()> {
        let mut s = self.device.lock();
        if s.failing.contains(op) {
            return Err(anyhow!("{op} unavailable"));
        }
        if detail.is_empty() {
            s.actions.push(op.to_string());
        } else {
            s.actions.push(format!("{op} {detail}"));
        }
        Ok(())
    }
}

fn tiny_png() -> Result<Vec<u8>> {
    let img = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(buf.into_inner())
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn open_page(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.record("open", url.to_string())?;
        let mut s = self.device.lock();
        s.url = url.to_string();
        s.title = format!("Page at {url}");
        s.pages += 1;
        Ok(())
    }

    async fn move_to(&mut self, at: Point) -> Result<()> {
        self.record("move", format!("{},{}", at.x, at.y))
    }

    async fn click(&mut self, at: Point, button: MouseButton, count: u8) -> Result<()> {
        self.record(
            "click",
            format!("{button:?}x{count} {},{}", at.x, at.y).to_lowercase(),
        )
    }

    async fn drag(&mut self, from: Point, to: Point) -> Result<()> {
        self.record("drag", format!("{},{}->{},{}", from.x, from.y, to.x, to.y))
    }

    async fn type_text(&mut self, text: &str) -> Result<()> {
        self.record("type", text.to_string())
    }

    async fn press_chord(&mut self, chord: &KeyChord) -> Result<()> {
        self.record("key", chord.to_string())
    }

    async fn fill(&mut self, selector: &str, text: &str, _timeout: Duration) -> Result<()> {
        self.record("fill", format!("{selector}={text}"))
    }

    async fn element_at(&mut self, at: Point) -> Result<Option<Vec<RawElement>>> {
        self.record("locate", format!("{},{}", at.x, at.y))?;
        Ok(self.device.lock().elements.get(&at).cloned())
    }

    async fn screenshot_png(&mut self) -> Result<Vec<u8>> {
        self.record("screenshot", String::new())?;
        tiny_png()
    }

    async fn current_url(&mut self) -> Result<String> {
        if self.device.lock().failing.contains("url") {
            return Err(anyhow!("url unavailable"));
        }
        Ok(self.device.lock().url.clone())
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.device.lock().title.clone())
    }

    async fn viewport(&mut self) -> Result<Size> {
        Ok(Size {
            width: 1280,
            height: 800,
        })
    }

    async fn clear_storage(&mut self) -> Result<()> {
        self.record("clear_storage", String::new())
    }

    async fn reset_permissions(&mut self) -> Result<()> {
        self.record("reset_permissions", String::new())
    }

    async fn close_extra_pages(&mut self) -> Result<()> {
        self.record("close_extra_pages", String::new())?;
        self.device.lock().pages = 1;
        Ok(())
    }

    async fn blank(&mut self) -> Result<()> {
        self.record("blank", String::new())?;
        self.device.lock().url = "about:blank".to_string();
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.record("shutdown", String::new())?;
        self.device.lock().shut_down = true;
        Ok(())
    }
}
