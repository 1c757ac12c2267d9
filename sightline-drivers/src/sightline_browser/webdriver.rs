//! `fantoccini` backend for chromedriver (web) and Appium (Android, iOS).
use crate::sightline_browser::backend::{BrowserBackend, MouseButton, RawElement};
use crate::sightline_browser::fingerprint::{element_at_in_source, LOCATE_SCRIPT};
use crate::sightline_browser::keys::{KeyChord, KeyName};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fantoccini::actions::{
    Actions, InputSource, KeyAction, KeyActions, MouseActions, PointerAction, TouchActions,
    MOUSE_BUTTON_LEFT, MOUSE_BUTTON_MIDDLE, MOUSE_BUTTON_RIGHT,
};
use fantoccini::key::Key;
use fantoccini::wd::{WebDriverCompatibleCommand, WindowHandle};
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{json, Value};
use sightline_common::{BrowserConfig, Platform, Point, Size};
use std::time::Duration;
use webdriver::capabilities::Capabilities;

const STORAGE_CLEAR_SCRIPT: &str = r#"
try { window.localStorage && window.localStorage.clear(); } catch (e) {}
try { window.sessionStorage && window.sessionStorage.clear(); } catch (e) {}
try {
  if (window.indexedDB && indexedDB.databases) {
    indexedDB.databases().then((dbs) => dbs.forEach((db) => db.name && indexedDB.deleteDatabase(db.name)));
  }
} catch (e) {}
try {
  if (window.caches) { caches.keys().then((keys) => keys.forEach((k) => caches.delete(k))); }
} catch (e) {}
return true;
"#;

const VIEWPORT_SCRIPT: &str = "return [window.innerWidth, window.innerHeight];";

const RESETTABLE_PERMISSIONS: &[&str] = &[
    "geolocation",
    "notifications",
    "camera",
    "microphone",
    "clipboard-read",
];

const LONG_PRESS: Duration = Duration::from_millis(800);
const DRAG_DURATION: Duration = Duration::from_millis(300);

/// Chrome arguments for a test session.
pub fn chrome_arguments(config: &BrowserConfig, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!(
            "--window-size={},{}",
            config.viewport_width, config.viewport_height
        ),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-search-engine-choice-screen".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
        args.push("--no-sandbox".to_string());
    }
    args
}

/// W3C capabilities for the configured platform. Explicit entries in
/// `browser.capabilities` win over the generated ones.
pub fn build_capabilities(config: &BrowserConfig, headless: bool) -> Capabilities {
    let mut caps = Capabilities::new();
    match config.platform {
        Platform::Web => {
            caps.insert("browserName".to_string(), json!("chrome"));
            caps.insert(
                "goog:chromeOptions".to_string(),
                json!({ "args": chrome_arguments(config, headless) }),
            );
        }
        Platform::Android => {
            caps.insert("platformName".to_string(), json!("Android"));
            caps.insert("appium:automationName".to_string(), json!("UiAutomator2"));
        }
        Platform::Ios => {
            caps.insert("platformName".to_string(), json!("iOS"));
            caps.insert("appium:automationName".to_string(), json!("XCUITest"));
        }
    }
    for (k, v) in &config.capabilities {
        caps.insert(k.clone(), v.clone());
    }
    caps
}

fn app_id_from(caps: &Capabilities, platform: Platform) -> Option<String> {
    let key = match platform {
        Platform::Android => "appium:appPackage",
        Platform::Ios => "appium:bundleId",
        Platform::Web => return None,
    };
    caps.get(key).and_then(Value::as_str).map(str::to_string)
}

fn webdriver_key(key: KeyName) -> char {
    let named = match key {
        KeyName::Char(c) => return c,
        KeyName::Enter => Key::Enter,
        KeyName::Tab => Key::Tab,
        KeyName::Backspace => Key::Backspace,
        KeyName::Escape => Key::Escape,
        KeyName::Space => Key::Space,
        KeyName::Delete => Key::Delete,
        KeyName::Insert => Key::Insert,
        KeyName::Home => Key::Home,
        KeyName::End => Key::End,
        KeyName::PageUp => Key::PageUp,
        KeyName::PageDown => Key::PageDown,
        KeyName::ArrowUp => Key::Up,
        KeyName::ArrowDown => Key::Down,
        KeyName::ArrowLeft => Key::Left,
        KeyName::ArrowRight => Key::Right,
        KeyName::Control => Key::Control,
        KeyName::Shift => Key::Shift,
        KeyName::Alt => Key::Alt,
        KeyName::Meta => Key::Meta,
        KeyName::F(n) => match n {
            1 => Key::F1,
            2 => Key::F2,
            3 => Key::F3,
            4 => Key::F4,
            5 => Key::F5,
            6 => Key::F6,
            7 => Key::F7,
            8 => Key::F8,
            9 => Key::F9,
            10 => Key::F10,
            11 => Key::F11,
            _ => Key::F12,
        },
    };
    named.into()
}

/// W3C `Set Permission` extension command, supported by chromedriver.
#[derive(Debug)]
struct SetPermission {
    name: &'static str,
    state: &'static str,
}

impl WebDriverCompatibleCommand for SetPermission {
    fn endpoint(
        &self,
        base_url: &url::Url,
        session_id: Option<&str>,
    ) -> std::result::Result<url::Url, url::ParseError> {
        base_url
            .join(&format!("session/{}/", session_id.unwrap_or_default()))?
            .join("permissions")
    }

    fn method_and_body(&self, _request_url: &url::Url) -> (http::Method, Option<String>) {
        let body = json!({ "descriptor": { "name": self.name }, "state": self.state });
        (http::Method::POST, Some(body.to_string()))
    }
}

pub struct WebDriverBackend {
    client: Client,
    platform: Platform,
    main_window: Option<WindowHandle>,
    app_id: Option<String>,
}

impl WebDriverBackend {
    /// Open a WebDriver session at `webdriver_url`.
    pub async fn connect(webdriver_url: &str, config: &BrowserConfig, headless: bool) -> Result<Self> {
        let caps = build_capabilities(config, headless);
        let app_id = app_id_from(&caps, config.platform);
        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(webdriver_url)
            .await
            .with_context(|| format!("new session at {webdriver_url}"))?;

        let main_window = if config.platform.is_mobile() {
            None
        } else {
            client.window().await.ok()
        };
        tracing::info!(
            platform = %config.platform,
            url = webdriver_url,
            "browser.webdriver.connected"
        );
        Ok(Self {
            client,
            platform: config.platform,
            main_window,
            app_id,
        })
    }

    fn is_native_app(&self) -> bool {
        self.platform.is_mobile() && self.app_id.is_some()
    }

    async fn perform_pointer(&self, steps: Vec<PointerAction>) -> Result<()> {
        let actions: Actions = if self.platform.is_mobile() {
            steps
                .into_iter()
                .fold(TouchActions::new("finger".to_string()), |acc, s| acc.then(s))
                .into()
        } else {
            steps
                .into_iter()
                .fold(MouseActions::new("mouse".to_string()), |acc, s| acc.then(s))
                .into()
        };
        self.client.perform_actions(actions).await?;
        Ok(())
    }

    async fn perform_keys(&self, steps: Vec<KeyAction>) -> Result<()> {
        let actions = steps
            .into_iter()
            .fold(KeyActions::new("keyboard".to_string()), |acc, s| acc.then(s));
        self.client.perform_actions(actions).await?;
        if let Err(e) = self.client.release_actions().await {
            tracing::debug!(error = %e, "browser.webdriver.release_failed");
        }
        Ok(())
    }

    async fn switch_to_remaining(&mut self) -> Result<()> {
        let handles = self.client.windows().await?;
        let target = match &self.main_window {
            Some(main) if handles.contains(main) => main.clone(),
            _ => handles
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no browser window left"))?,
        };
        self.client.switch_to_window(target.clone()).await?;
        self.main_window = Some(target);
        Ok(())
    }

    async fn mobile_command(&self, command: &str, args: Value) -> Result<Value> {
        Ok(self.client.execute(command, vec![args]).await?)
    }
}

fn pointer_to(at: Point, duration: Option<Duration>) -> PointerAction {
    PointerAction::MoveTo {
        duration,
        x: at.x as _,
        y: at.y as _,
    }
}

#[async_trait]
impl BrowserBackend for WebDriverBackend {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn open_page(&mut self, url: &str, timeout: Duration) -> Result<()> {
        if self.platform.is_mobile() {
            if url.starts_with("http://") || url.starts_with("https://") || !self.is_native_app() {
                tokio::time::timeout(timeout, self.client.goto(url))
                    .await
                    .map_err(|_| anyhow!("timed out after {}ms", timeout.as_millis()))??;
            } else {
                let id_key = if self.platform == Platform::Android { "package" } else { "bundleId" };
                self.mobile_command(
                    "mobile: deepLink",
                    json!({ "url": url, id_key: self.app_id.clone() }),
                )
                .await?;
            }
            return Ok(());
        }

        let opened = self.client.new_window(true).await?;
        self.client.switch_to_window(opened.handle.clone()).await?;
        let outcome = match tokio::time::timeout(timeout, self.client.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!(e)),
            Err(_) => Err(anyhow!("timed out after {}ms", timeout.as_millis())),
        };
        if let Err(e) = outcome {
            if let Err(close_err) = self.client.close_window().await {
                tracing::warn!(error = %close_err, "browser.webdriver.close_failed_page_failed");
            }
            self.switch_to_remaining().await.ok();
            return Err(e);
        }
        Ok(())
    }

    async fn move_to(&mut self, at: Point) -> Result<()> {
        self.perform_pointer(vec![pointer_to(at, None)]).await
    }

    async fn click(&mut self, at: Point, button: MouseButton, count: u8) -> Result<()> {
        let mut steps = vec![pointer_to(at, None)];
        if self.platform.is_mobile() {
            match button {
                MouseButton::Right => {
                    steps.push(PointerAction::Down { button: MOUSE_BUTTON_LEFT });
                    steps.push(PointerAction::Pause { duration: LONG_PRESS });
                    steps.push(PointerAction::Up { button: MOUSE_BUTTON_LEFT });
                }
                _ => {
                    for _ in 0..count.max(1) {
                        steps.push(PointerAction::Down { button: MOUSE_BUTTON_LEFT });
                        steps.push(PointerAction::Up { button: MOUSE_BUTTON_LEFT });
                    }
                }
            }
        } else {
            let code = match button {
                MouseButton::Left => MOUSE_BUTTON_LEFT,
                MouseButton::Middle => MOUSE_BUTTON_MIDDLE,
                MouseButton::Right => MOUSE_BUTTON_RIGHT,
            };
            for _ in 0..count.max(1) {
                steps.push(PointerAction::Down { button: code });
                steps.push(PointerAction::Up { button: code });
            }
        }
        self.perform_pointer(steps).await
    }

    async fn drag(&mut self, from: Point, to: Point) -> Result<()> {
        self.perform_pointer(vec![
            pointer_to(from, None),
            PointerAction::Down { button: MOUSE_BUTTON_LEFT },
            pointer_to(to, Some(DRAG_DURATION)),
            PointerAction::Up { button: MOUSE_BUTTON_LEFT },
        ])
        .await
    }

    async fn type_text(&mut self, text: &str) -> Result<()> {
        if self.platform.is_mobile() {
            let focused = self.client.active_element().await?;
            focused.send_keys(text).await?;
            return Ok(());
        }
        let steps = text
            .chars()
            .flat_map(|c| [KeyAction::Down { value: c }, KeyAction::Up { value: c }])
            .collect();
        self.perform_keys(steps).await
    }

    async fn press_chord(&mut self, chord: &KeyChord) -> Result<()> {
        let chars: Vec<char> = chord.keys.iter().map(|k| webdriver_key(*k)).collect();
        let mut steps: Vec<KeyAction> = chars.iter().map(|c| KeyAction::Down { value: *c }).collect();
        steps.extend(chars.iter().rev().map(|c| KeyAction::Up { value: *c }));
        self.perform_keys(steps).await
    }

    async fn fill(&mut self, selector: &str, text: &str, timeout: Duration) -> Result<()> {
        let field = self
            .client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(selector))
            .await
            .with_context(|| format!("no element matches {selector}"))?;
        field.clear().await?;
        field.send_keys(text).await?;
        Ok(())
    }

    async fn element_at(&mut self, at: Point) -> Result<Option<Vec<RawElement>>> {
        if self.platform.is_mobile() {
            let source = self.client.source().await?;
            return Ok(element_at_in_source(&source, at));
        }
        let value = self
            .client
            .execute(LOCATE_SCRIPT, vec![json!(at.x), json!(at.y)])
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let chain: Vec<RawElement> =
            serde_json::from_value(value).context("unexpected element chain")?;
        Ok(if chain.is_empty() { None } else { Some(chain) })
    }

    async fn screenshot_png(&mut self) -> Result<Vec<u8>> {
        Ok(self.client.screenshot().await?)
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.client.title().await?)
    }

    async fn viewport(&mut self) -> Result<Size> {
        if self.platform.is_mobile() {
            let (w, h) = self.client.get_window_size().await?;
            return Ok(Size {
                width: w as u32,
                height: h as u32,
            });
        }
        let value = self.client.execute(VIEWPORT_SCRIPT, vec![]).await?;
        let dims: Vec<u32> = serde_json::from_value(value).context("unexpected viewport")?;
        match dims.as_slice() {
            [width, height] => Ok(Size {
                width: *width,
                height: *height,
            }),
            _ => Err(anyhow!("unexpected viewport {dims:?}")),
        }
    }

    async fn clear_storage(&mut self) -> Result<()> {
        if self.is_native_app() {
            let app_id = self.app_id.clone();
            if self.platform == Platform::Android {
                self.mobile_command("mobile: clearApp", json!({ "appId": app_id }))
                    .await?;
            } else {
                self.mobile_command("mobile: terminateApp", json!({ "bundleId": app_id }))
                    .await?;
                self.mobile_command("mobile: activateApp", json!({ "bundleId": app_id }))
                    .await?;
            }
            return Ok(());
        }
        self.client.delete_all_cookies().await?;
        self.client.execute(STORAGE_CLEAR_SCRIPT, vec![]).await?;
        Ok(())
    }

    async fn reset_permissions(&mut self) -> Result<()> {
        if self.platform.is_mobile() {
            return Ok(());
        }
        for &name in RESETTABLE_PERMISSIONS {
            let cmd = SetPermission {
                name,
                state: "prompt",
            };
            if let Err(e) = self.client.issue_cmd(cmd).await {
                tracing::debug!(permission = name, error = %e, "browser.webdriver.permission_reset_failed");
            }
        }
        Ok(())
    }

    async fn close_extra_pages(&mut self) -> Result<()> {
        if self.platform.is_mobile() {
            return Ok(());
        }
        let handles = self.client.windows().await?;
        let keep = match &self.main_window {
            Some(main) if handles.contains(main) => main.clone(),
            _ => match handles.first() {
                Some(first) => first.clone(),
                None => return Ok(()),
            },
        };
        for handle in handles.into_iter().filter(|h| *h != keep) {
            self.client.switch_to_window(handle).await?;
            self.client.close_window().await?;
        }
        self.client.switch_to_window(keep.clone()).await?;
        self.main_window = Some(keep);
        Ok(())
    }

    async fn blank(&mut self) -> Result<()> {
        if self.is_native_app() {
            return Ok(());
        }
        self.client.goto("about:blank").await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client.clone().close().await?;
        Ok(())
    }
}
