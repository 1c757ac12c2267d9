use anyhow::Result;
use clap::Parser;
use sightline_common::SightlineConfig;
use sightline_config::{SightlineConfigLoader, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;

/// Run natural-language UI tests against a browser or device.
#[derive(Debug, Parser)]
#[command(name = "sightline", version)]
pub struct Cli {
    /// Only run test files whose path matches this regex.
    pub pattern: Option<String>,

    /// Run the browser without a window.
    #[arg(long)]
    pub headless: bool,

    /// Base URL every test starts from.
    #[arg(long, value_name = "URL")]
    pub target: Option<String>,

    /// Log model transcripts.
    #[arg(long)]
    pub debug_ai: bool,

    /// Always run live; neither read nor write the action cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Keep running and re-run test files when they change.
    #[arg(long)]
    pub watch: bool,

    /// Config file; defaults to ./sightline.yaml when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn load_config(&self) -> Result<SightlineConfig> {
        let loader = SightlineConfigLoader::new();
        let loader = match &self.config {
            Some(path) => loader.with_file(path),
            None => loader.with_optional_file(DEFAULT_CONFIG_FILE),
        };
        let mut config = loader.load()?;
        self.apply(&mut config);
        Ok(config)
    }

    /// Flags win over the file and the environment.
    pub fn apply(&self, config: &mut SightlineConfig) {
        if self.headless {
            config.headless = true;
        }
        if let Some(url) = &self.target {
            config.base_url = Some(url.clone());
        }
        if self.debug_ai {
            config.ai.debug = true;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_loaded_config() {
        let cli = Cli::try_parse_from([
            "sightline",
            "auth/.*",
            "--headless",
            "--target",
            "http://localhost:4000",
            "--no-cache",
            "--debug-ai",
        ])
        .unwrap();
        assert_eq!(cli.pattern.as_deref(), Some("auth/.*"));
        assert!(!cli.watch);

        let mut config = SightlineConfig::default();
        cli.apply(&mut config);
        assert!(config.headless);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:4000"));
        assert!(!config.cache.enabled);
        assert!(config.ai.debug);
    }

    #[test]
    fn absent_flags_leave_the_config_alone() {
        let cli = Cli::try_parse_from(["sightline", "--watch"]).unwrap();
        let mut config = SightlineConfig::default();
        config.base_url = Some("https://app.test".to_string());
        cli.apply(&mut config);
        assert!(cli.watch);
        assert!(!config.headless);
        assert!(config.cache.enabled);
        assert_eq!(config.base_url.as_deref(), Some("https://app.test"));
    }
}
