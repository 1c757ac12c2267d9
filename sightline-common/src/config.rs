//! Runtime configuration model.
//!
//! Every section deserializes with defaults so a config file only needs to
//! name what it overrides. Durations are stored as integer milliseconds (or
//! seconds where noted) and exposed through `Duration` accessors.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top‑level configuration for a Sightline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SightlineConfig {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Base URL the tests start from. Test files may override it.
    pub base_url: Option<String>,
    /// Directory searched for test files.
    pub test_dir: PathBuf,
    /// File name suffix identifying test files.
    pub test_suffix: String,
    pub browser: BrowserConfig,
    pub ai: AiConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub screenshots: ScreenshotConfig,
    pub mailosaur: Option<MailosaurConfig>,
    pub github: Option<GithubConfig>,
}

impl Default for SightlineConfig {
    fn default() -> Self {
        Self {
            headless: false,
            base_url: None,
            test_dir: PathBuf::from("."),
            test_suffix: ".test.yaml".to_string(),
            browser: BrowserConfig::default(),
            ai: AiConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            screenshots: ScreenshotConfig::default(),
            mailosaur: None,
            github: None,
        }
    }
}

/// Automation backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Web,
    Android,
    Ios,
}

impl Platform {
    pub fn is_mobile(self) -> bool {
        matches!(self, Platform::Android | Platform::Ios)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Platform::Web => "web",
            Platform::Android => "android",
            Platform::Ios => "ios",
        })
    }
}

/// WebDriver / Appium connection and action limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub platform: Platform,
    /// Connect to an already running server instead of spawning `binary`.
    pub webdriver_url: Option<String>,
    /// Server executable spawned when `webdriver_url` is unset.
    pub binary: String,
    pub port: u16,
    /// Command run once when `binary` cannot be found.
    pub install_command: Vec<String>,
    pub launch_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub default_sleep_ms: u64,
    pub max_sleep_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Extra capabilities merged into the session request (e.g. `appium:app`).
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Web,
            webdriver_url: None,
            binary: "chromedriver".to_string(),
            port: 9515,
            install_command: vec![
                "npx".to_string(),
                "--yes".to_string(),
                "@puppeteer/browsers".to_string(),
                "install".to_string(),
                "chromedriver@stable".to_string(),
            ],
            launch_timeout_ms: 15_000,
            navigation_timeout_ms: 30_000,
            default_sleep_ms: 1_000,
            max_sleep_ms: 60_000,
            viewport_width: 1280,
            viewport_height: 800,
            capabilities: serde_json::Map::new(),
        }
    }
}

impl BrowserConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Upper bound on model turns per test.
    pub max_turns: usize,
    /// Log model text and tool calls under the `sightline.ai` target.
    pub debug: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-5-sonnet-20241022".to_string(),
            base_url: "https://api.anthropic.com/v1/".to_string(),
            max_tokens: 1024,
            max_turns: 50,
            debug: false,
        }
    }
}

/// Action cache persistence and lock tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Directory holding `cache.json` and `cache.lock`.
    pub dir: PathBuf,
    pub ttl_secs: u64,
    /// Fraction of writes that also purge expired entries.
    pub cleanup_probability: f64,
    pub lock_timeout_ms: u64,
    pub lock_poll_ms: u64,
    /// Consecutive acquisition failures before the lock is force-released.
    pub max_lock_failures: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".sightline"),
            ttl_secs: 7 * 24 * 60 * 60,
            cleanup_probability: 0.03,
            lock_timeout_ms: 1_000,
            lock_poll_ms: 50,
            max_lock_failures: 3,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }
}

/// Retry policy for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Linear backoff unit; attempt `n` waits `n * backoff_ms`.
    pub backoff_ms: u64,
    pub rate_limit_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 5_000,
            rate_limit_cooldown_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }
}

/// Local screenshot retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub dir: PathBuf,
    pub max_files: usize,
    pub max_age_secs: u64,
    pub jpeg_quality: u8,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".sightline").join("screenshots"),
            max_files: 10,
            max_age_secs: 5 * 60 * 60,
            jpeg_quality: 80,
        }
    }
}

/// Credentials for the email inspection tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailosaurConfig {
    pub api_key: String,
    pub server_id: String,
    #[serde(default = "default_mailosaur_endpoint")]
    pub endpoint: String,
}

fn default_mailosaur_endpoint() -> String {
    "https://mailosaur.com/".into()
}

/// Credentials for the GitHub login tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub username: String,
    pub password: String,
    /// Base32 TOTP secret used to answer the 2FA prompt.
    pub totp_secret: Option<String>,
}
