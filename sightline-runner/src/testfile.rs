//! Declarative `*.test.yaml` files.
//!
//! ```yaml
//! base_url: https://example.com
//! tests:
//!   - name: Login to the app
//!     payload: { username: alice }
//!     expectations:
//!       - dashboard is visible
//!       - description: the avatar shows "A"
//! ```
use crate::error::RunnerError;
use crate::registry::Registry;
use serde::Deserialize;
use serde_json::Value;
use sightline_agent::TestDefinition;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestFile {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub expectations: Vec<ExpectationSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExpectationSpec {
    Plain(String),
    Detailed { description: String },
}

impl ExpectationSpec {
    pub fn description(&self) -> &str {
        match self {
            ExpectationSpec::Plain(d) | ExpectationSpec::Detailed { description: d } => d,
        }
    }
}

impl TestFile {
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self, RunnerError> {
        serde_yaml::from_str(yaml).map_err(|source| RunnerError::TestFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, RunnerError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RunnerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&raw, path)
    }

    pub fn into_registry(self) -> Registry {
        let mut registry = Registry::new();
        if let Some(url) = self.base_url {
            registry.set_base_url(url);
        }
        for spec in self.tests {
            let mut test = TestDefinition::new(spec.name);
            if let Some(payload) = spec.payload {
                test = test.with_payload(payload);
            }
            for exp in &spec.expectations {
                test = test.expect(exp.description());
            }
            registry.test(test);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tests_with_both_expectation_forms() {
        let file = TestFile::from_yaml(
            r#"
base_url: https://example.com
tests:
  - name: Login
    payload: { username: alice, remember: true }
    expectations:
      - dashboard is visible
      - description: avatar shows A
  - name: Logout
"#,
            Path::new("login.test.yaml"),
        )
        .unwrap();

        let registry = file.into_registry();
        assert_eq!(registry.base_url(), Some("https://example.com"));
        let tests = registry.tests();
        assert_eq!(tests.len(), 2);
        assert_eq!(
            tests[0].payload,
            Some(json!({ "username": "alice", "remember": true }))
        );
        let expectations: Vec<_> = tests[0]
            .expectations
            .iter()
            .map(|e| e.description.as_str())
            .collect();
        assert_eq!(expectations, ["dashboard is visible", "avatar shows A"]);
        assert!(tests[1].expectations.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = TestFile::from_yaml("tests:\n  - name: x\n    steps: []\n", Path::new("x.test.yaml"))
            .unwrap_err();
        assert!(matches!(err, RunnerError::TestFile { .. }));
    }
}
