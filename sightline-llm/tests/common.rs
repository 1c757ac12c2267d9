use std::path::PathBuf;
use std::sync::OnceLock;

use sightline_common::observability::{init_logging, LogConfig};

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Route test logs (transcripts included) to a temp file and stderr.
pub fn init_test_tracing() {
    LOG_FILE.get_or_init(|| {
        init_logging(LogConfig {
            file_stem: "sightline-tests",
            dir: Some(std::env::temp_dir().join("sightline-test-logs")),
            stderr: true,
            level: "debug".to_string(),
            debug_ai: true,
            ..LogConfig::default()
        })
        .unwrap_or_default()
    });
}
