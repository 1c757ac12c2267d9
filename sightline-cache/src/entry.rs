use serde::{Deserialize, Serialize};
use serde_json::Value;
use sightline_common::{Fingerprint, Point};

/// The tool call a step replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAction {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepExtras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStep {
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub extras: StepExtras,
    pub timestamp: i64,
}

impl CacheStep {
    /// Screenshots only feed the model and are skipped on replay.
    pub fn is_screenshot(&self) -> bool {
        self.action.name == "screenshot"
            || (self.action.name == "computer"
                && self.action.input.get("action").and_then(Value::as_str) == Some("screenshot"))
    }
}

/// A recorded trace, stamped with the time it was written (unix millis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub steps: Vec<CacheStep>,
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn new(steps: Vec<CacheStep>) -> Self {
        Self {
            steps,
            timestamp: sightline_common::now_millis(),
        }
    }

    pub fn is_expired(&self, now_millis: i64, ttl_millis: i64) -> bool {
        now_millis.saturating_sub(self.timestamp) > ttl_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str, input: Value) -> CacheStep {
        CacheStep {
            action: StepAction {
                name: name.into(),
                input,
            },
            reasoning: None,
            result: Value::Null,
            extras: StepExtras::default(),
            timestamp: 0,
        }
    }

    #[test]
    fn detects_screenshot_steps() {
        assert!(step("computer", json!({ "action": "screenshot" })).is_screenshot());
        assert!(!step("computer", json!({ "action": "left_click" })).is_screenshot());
        assert!(!step("sleep", json!({ "duration": 5 })).is_screenshot());
    }

    #[test]
    fn expiry_uses_ttl() {
        let entry = CacheEntry {
            steps: vec![],
            timestamp: 1_000,
        };
        assert!(!entry.is_expired(2_000, 1_000));
        assert!(entry.is_expired(2_001, 1_000));
    }
}
