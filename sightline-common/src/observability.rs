//! `tracing` setup shared by the `sightline` binary and integration tests.
//!
//! Everything goes to a daily file under `.sightline/logs` (or
//! `SIGHTLINE_LOG_DIR`). Run summaries are printed by the runner, so stderr
//! mirroring is off unless asked for. Model transcripts use [`AI_TARGET`] and
//! stay at `warn` until `--debug-ai` raises them.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Target used for model transcripts; enabled by `--debug-ai`.
pub const AI_TARGET: &str = "sightline.ai";

const LOG_DIR_ENV: &str = "SIGHTLINE_LOG_DIR";
const LOG_FORMAT_ENV: &str = "SIGHTLINE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `SIGHTLINE_LOG_FORMAT=json` selects JSON lines; anything else is text.
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// File stem; the appender adds the date.
    pub file_stem: &'static str,
    /// Falls back to `SIGHTLINE_LOG_DIR`, then `./.sightline/logs`.
    pub dir: Option<PathBuf>,
    pub stderr: bool,
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    pub debug_ai: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_stem: "sightline",
            dir: None,
            stderr: false,
            format: LogFormat::from_env(),
            level: "info".to_string(),
            debug_ai: false,
        }
    }
}

impl LogConfig {
    pub fn filter_directives(&self) -> String {
        let ai = if self.debug_ai { "info" } else { "warn" };
        format!("{},{AI_TARGET}={ai}", self.level)
    }
}

/// Install the global subscriber and return today's log file.
///
/// Only the first call does anything; later calls get the same path back.
pub fn init_logging(config: LogConfig) -> anyhow::Result<PathBuf> {
    if let Some(path) = LOG_PATH.get() {
        return Ok(path.clone());
    }

    let dir = log_dir(config.dir.as_deref());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

    let file_name = format!("{}.log", config.file_stem);
    let path = dir.join(format!("{file_name}.{}", Local::now().format("%Y-%m-%d")));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, &file_name));
    let _ = LOG_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json = config.format == LogFormat::Json;
    let file_layer = if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_writer(writer).with_ansi(false).boxed()
    };
    let stderr_layer = config.stderr.then(|| {
        if json {
            fmt::layer().json().with_writer(std::io::stderr).boxed()
        } else {
            fmt::layer().compact().with_writer(std::io::stderr).boxed()
        }
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?;

    let _ = LOG_PATH.set(path.clone());
    Ok(path)
}

fn log_dir(explicit: Option<&Path>) -> PathBuf {
    let chosen = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(LOG_DIR_ENV).map(PathBuf::from));
    match chosen {
        Some(dir) => expand_home(&dir),
        None => PathBuf::from(".sightline").join("logs"),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let home = std::env::var_os("HOME");
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_ai_raises_transcript_target() {
        let quiet = LogConfig::default();
        assert_eq!(quiet.filter_directives(), "info,sightline.ai=warn");

        let loud = LogConfig {
            debug_ai: true,
            level: "debug".into(),
            ..LogConfig::default()
        };
        assert_eq!(loud.filter_directives(), "debug,sightline.ai=info");
    }

    #[test]
    fn explicit_dir_wins() {
        let dir = log_dir(Some(Path::new("/tmp/sightline-logs")));
        assert_eq!(dir, PathBuf::from("/tmp/sightline-logs"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let Some(home) = std::env::var_os("HOME") else {
            return;
        };
        assert_eq!(expand_home(Path::new("~/logs")), PathBuf::from(home).join("logs"));
        assert_eq!(expand_home(Path::new("/abs/logs")), PathBuf::from("/abs/logs"));
    }
}
