//! Loader for `sightline.yaml` with environment overlays.
//!
//! Precedence, lowest to highest: built-in defaults, the YAML file(s) in the
//! order they were attached, then `SIGHTLINE__`-prefixed environment variables
//! (`SIGHTLINE__AI__MODEL=...`, `SIGHTLINE__HEADLESS=true`). After merging,
//! every string is passed through recursive `${VAR}` expansion so secrets can
//! stay out of the file (`api_key: "${ANTHROPIC_API_KEY}"`).
use config::{Config, Environment, File, FileFormat};
use serde_json::Value;
use sightline_common::SightlineConfig;
use std::path::Path;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

/// Conventional file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sightline.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Drop values that still hold an unresolved `${VAR}` so optional secrets fall
/// back to their defaults instead of leaking the placeholder.
fn prune_unresolved(v: &mut Value) {
    match v {
        Value::Object(obj) => {
            obj.retain(|_, child| !is_unresolved(child));
            obj.values_mut().for_each(prune_unresolved);
        }
        Value::Array(arr) => arr.iter_mut().for_each(prune_unresolved),
        _ => {}
    }
}

fn is_unresolved(v: &Value) -> bool {
    matches!(v, Value::String(s) if s.starts_with("${") && s.ends_with('}'))
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct SightlineConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for SightlineConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SightlineConfigLoader {
    /// Start from defaults; `SIGHTLINE__` env overrides are applied by [`Self::load`].
    ///
    /// ```
    /// use sightline_config::SightlineConfigLoader;
    ///
    /// let config = SightlineConfigLoader::new()
    ///     .with_yaml_str("headless: true\nbase_url: http://localhost:3000")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert!(config.headless);
    /// assert_eq!(config.base_url.as_deref(), Some("http://localhost:3000"));
    /// assert_eq!(config.retry.max_retries, 3);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a required YAML/TOML/JSON file; the format is inferred by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that may be absent, so headless deployments can rely on
    /// environment variables alone.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline YAML snippet.
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self.builder.add_source(File::from_str(yaml, FileFormat::Yaml));
        self
    }

    /// Consume the builder, expand `${VAR}` placeholders and deserialize.
    ///
    /// ```
    /// use sightline_config::SightlineConfigLoader;
    ///
    /// unsafe { std::env::set_var("DOCTEST_ANTHROPIC_KEY", "sk-from-env"); }
    ///
    /// let config = SightlineConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// ai:
    ///   api_key: "${DOCTEST_ANTHROPIC_KEY}"
    ///   model: "claude-3-5-sonnet-20241022"
    /// cache:
    ///   dir: ".cache/sightline"
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.ai.api_key.as_deref(), Some("sk-from-env"));
    /// assert_eq!(config.cache.dir, std::path::PathBuf::from(".cache/sightline"));
    ///
    /// unsafe { std::env::remove_var("DOCTEST_ANTHROPIC_KEY"); }
    /// ```
    pub fn load(self) -> Result<SightlineConfig, ConfigLoadError> {
        // Env goes last so it overrides every attached file.
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix("SIGHTLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);
        prune_unresolved(&mut v);

        let mut typed: SightlineConfig =
            serde_json::from_value(v).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        if typed.ai.api_key.is_none() {
            typed.ai.api_key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        validate(&typed)?;
        tracing::debug!(
            platform = %typed.browser.platform,
            headless = typed.headless,
            cache_enabled = typed.cache.enabled,
            "config.loaded"
        );
        Ok(typed)
    }
}

fn validate(cfg: &SightlineConfig) -> Result<(), ConfigLoadError> {
    if !(0.0..=1.0).contains(&cfg.cache.cleanup_probability) {
        return Err(ConfigLoadError::Invalid(format!(
            "cache.cleanup_probability must be within 0..=1, got {}",
            cfg.cache.cleanup_probability
        )));
    }
    if cfg.ai.max_turns == 0 {
        return Err(ConfigLoadError::Invalid(
            "ai.max_turns must be at least 1".into(),
        ));
    }
    if cfg.browser.default_sleep_ms > cfg.browser.max_sleep_ms {
        return Err(ConfigLoadError::Invalid(
            "browser.default_sleep_ms exceeds browser.max_sleep_ms".into(),
        ));
    }
    if cfg.browser.platform.is_mobile() && cfg.browser.webdriver_url.is_none() {
        return Err(ConfigLoadError::Invalid(format!(
            "platform {} requires browser.webdriver_url pointing at an Appium server",
            cfg.browser.platform
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("FOO", Some("bar"), || {
            let mut v = json!("prefix-${FOO}-suffix");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("prefix-bar-suffix"));
        });
    }

    #[test]
    fn expands_recursively_across_env_values() {
        temp_env::with_vars(
            [
                ("BAZ", Some("qux")),
                ("BAR", Some("mid-${BAZ}")),
                ("FOO", Some("start-${BAR}-end")),
            ],
            || {
                let mut v = json!({ "nested": ["X=${FOO}"] });
                expand_env_in_value(&mut v);
                assert_eq!(v, json!({ "nested": ["X=start-mid-qux-end"] }));
            },
        );
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}-y");
            expand_env_in_value(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.ends_with("-y"));
            assert!(s.contains("${"));
        });
    }

    #[test]
    fn unresolved_placeholders_are_pruned() {
        let mut v = json!({ "ai": { "api_key": "${DOES_NOT_EXIST}", "model": "m" } });
        expand_env_in_value(&mut v);
        prune_unresolved(&mut v);
        assert_eq!(v, json!({ "ai": { "model": "m" } }));
    }

    #[test]
    fn rejects_out_of_range_cleanup_probability() {
        let err = SightlineConfigLoader::new()
            .with_yaml_str("cache:\n  cleanup_probability: 1.5")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
    }

    #[test]
    fn mobile_requires_server_url() {
        let err = SightlineConfigLoader::new()
            .with_yaml_str("browser:\n  platform: ios")
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("Appium"));
    }
}
