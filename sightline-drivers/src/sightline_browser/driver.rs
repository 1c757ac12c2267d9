use crate::sightline_browser::browser::{Browser, BrowserOptions};
use crate::sightline_browser::error::{DriverError, ToolError};
use crate::sightline_browser::webdriver::WebDriverBackend;
use async_trait::async_trait;
use sightline_common::{BrowserConfig, ScreenshotConfig};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use uuid::Uuid;

/// Shared access to a session's browser for tools and callbacks.
pub type SessionHandle = Arc<tokio::sync::Mutex<Browser>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Destroyed,
}

/// One browser session, scoped to a single test file.
pub struct Session {
    id: Uuid,
    handle: SessionHandle,
    state: SessionState,
}

impl Session {
    pub fn new(browser: Browser) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle: Arc::new(tokio::sync::Mutex::new(browser)),
            state: SessionState::Created,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        Arc::clone(&self.handle)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Mark the session active, opening `base_url` first when given.
    pub async fn start(&mut self, base_url: Option<&str>) -> Result<(), ToolError> {
        if self.state == SessionState::Destroyed {
            return Err(ToolError::Destroyed);
        }
        if let Some(url) = base_url {
            self.handle.lock().await.navigate(url).await?;
        }
        self.state = SessionState::Active;
        tracing::debug!(session = %self.id, "browser.session.active");
        Ok(())
    }

    /// Clean up and release the browser. Safe to call more than once.
    pub async fn destroy(&mut self) -> Result<(), ToolError> {
        if self.state == SessionState::Destroyed {
            return Ok(());
        }
        self.state = SessionState::Destroyed;
        let mut browser = self.handle.lock().await;
        if let Err(e) = browser.cleanup().await {
            tracing::warn!(session = %self.id, error = %e, "browser.session.cleanup_failed");
        }
        let result = browser.destroy().await;
        tracing::debug!(session = %self.id, "browser.session.destroyed");
        result
    }
}

/// Produces fresh sessions; the runner asks for one per test file.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(&self) -> Result<Session, DriverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DriverState {
    Uninitialized,
    Launched { webdriver_url: String },
    Destroyed,
}

/// Owns the WebDriver server (a spawned chromedriver, or an external
/// endpoint such as Appium) and opens sessions against it.
pub struct Driver {
    browser: BrowserConfig,
    screenshots: ScreenshotConfig,
    headless: bool,
    state: DriverState,
    server: Option<Child>,
    install_attempted: AtomicBool,
}

impl Driver {
    pub fn new(browser: BrowserConfig, screenshots: ScreenshotConfig, headless: bool) -> Self {
        Self {
            browser,
            screenshots,
            headless,
            state: DriverState::Uninitialized,
            server: None,
            install_attempted: AtomicBool::new(false),
        }
    }

    pub fn is_launched(&self) -> bool {
        matches!(self.state, DriverState::Launched { .. })
    }

    /// Start the WebDriver server. Idempotent once launched.
    ///
    /// A missing driver binary triggers the configured install command once,
    /// followed by a single retry.
    pub async fn launch(&mut self) -> Result<(), DriverError> {
        match self.state {
            DriverState::Launched { .. } => return Ok(()),
            DriverState::Destroyed => return Err(DriverError::Destroyed),
            DriverState::Uninitialized => {}
        }

        let webdriver_url = match &self.browser.webdriver_url {
            Some(url) => url.clone(),
            None => {
                let child = self.spawn_server().await?;
                self.server = Some(child);
                self.wait_until_ready().await?;
                format!("http://localhost:{}", self.browser.port)
            }
        };
        tracing::info!(url = %webdriver_url, platform = %self.browser.platform, "browser.driver.launched");
        self.state = DriverState::Launched { webdriver_url };
        Ok(())
    }

    async fn spawn_server(&self) -> Result<Child, DriverError> {
        let binary = match which::which(&self.browser.binary) {
            Ok(path) => path,
            Err(first) => {
                tracing::warn!(binary = %self.browser.binary, error = %first, "browser.driver.binary_missing");
                self.install_once().await?;
                which::which(&self.browser.binary).map_err(|e| DriverError::Launch {
                    binary: self.browser.binary.clone(),
                    message: format!("still missing after install: {e}"),
                })?
            }
        };

        Command::new(&binary)
            .arg(format!("--port={}", self.browser.port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Launch {
                binary: binary.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn wait_until_ready(&self) -> Result<(), DriverError> {
        let deadline = Instant::now() + self.browser.launch_timeout();
        loop {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.browser.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Launch {
                    binary: self.browser.binary.clone(),
                    message: format!(
                        "port {} not accepting connections after {}ms",
                        self.browser.port, self.browser.launch_timeout_ms
                    ),
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn install_once(&self) -> Result<(), DriverError> {
        if self.install_attempted.swap(true, Ordering::SeqCst) {
            return Err(DriverError::Install("install already attempted".to_string()));
        }
        let (program, args) = self
            .browser
            .install_command
            .split_first()
            .ok_or_else(|| DriverError::Install("no install command configured".to_string()))?;
        tracing::info!(command = ?self.browser.install_command, "browser.driver.installing");
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| DriverError::Install(format!("{program}: {e}")))?;
        if !status.success() {
            return Err(DriverError::Install(format!("{program} exited with {status}")));
        }
        Ok(())
    }

    /// Stop the server. Safe to call more than once.
    pub async fn destroy(&mut self) -> Result<(), DriverError> {
        if self.state == DriverState::Destroyed {
            return Ok(());
        }
        self.state = DriverState::Destroyed;
        if let Some(mut child) = self.server.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "browser.driver.kill_failed");
            }
        }
        tracing::info!("browser.driver.destroyed");
        Ok(())
    }
}

fn is_missing_browser(err: &anyhow::Error) -> bool {
    let msg = format!("{err:#}").to_ascii_lowercase();
    msg.contains("binary") && (msg.contains("cannot find") || msg.contains("no such file"))
}

#[async_trait]
impl SessionFactory for Driver {
    async fn create_session(&self) -> Result<Session, DriverError> {
        let webdriver_url = match &self.state {
            DriverState::Launched { webdriver_url } => webdriver_url.clone(),
            DriverState::Uninitialized => return Err(DriverError::NotLaunched),
            DriverState::Destroyed => return Err(DriverError::Destroyed),
        };

        let connect = || WebDriverBackend::connect(&webdriver_url, &self.browser, self.headless);
        let backend = match connect().await {
            Ok(backend) => backend,
            Err(e) if is_missing_browser(&e) => {
                tracing::warn!(error = %format!("{e:#}"), "browser.driver.browser_missing");
                self.install_once().await?;
                connect().await.map_err(|e| DriverError::Session {
                    url: webdriver_url.clone(),
                    message: format!("{e:#}"),
                })?
            }
            Err(e) => {
                return Err(DriverError::Session {
                    url: webdriver_url.clone(),
                    message: format!("{e:#}"),
                })
            }
        };

        let options = BrowserOptions::from_config(&self.browser, &self.screenshots);
        let session = Session::new(Browser::new(Box::new(backend), options));
        tracing::info!(session = %session.id(), "browser.session.created");
        Ok(session)
    }
}
