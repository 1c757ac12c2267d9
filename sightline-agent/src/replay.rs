//! Deterministic re-execution of a cached trace, without the model.
use crate::adapter::{Adapter, Integrations};
use crate::definition::TestDefinition;
use crate::tools::ToolCall;
use serde_json::Value;
use sightline_cache::{CacheEntry, CacheStep};
use sightline_drivers::SessionHandle;
use std::sync::Arc;

pub const REPLAY_PASS_REASON: &str = "Test passed from cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Passed { reason: String },
    /// The UI no longer matches the trace at `step`; the entry should be
    /// dropped and the test run live.
    Stale { step: usize, reason: String },
}

impl ReplayOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ReplayOutcome::Passed { .. })
    }
}

fn recorded_error(step: &CacheStep) -> bool {
    step.result
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Replay `entry` step by step on `session`.
///
/// Screenshots and steps that already failed while recording are skipped; a
/// skipped `run_callback` still consumes its callback so later ones line up
/// with the recording. Before each step with a recorded fingerprint the element at the recorded
/// coordinate is located again; any difference, and any execution error,
/// makes the whole entry stale.
pub async fn replay(
    entry: &CacheEntry,
    test: Arc<TestDefinition>,
    session: SessionHandle,
    integrations: Integrations,
) -> ReplayOutcome {
    let platform = session.lock().await.platform();
    let mut adapter = Adapter::new(platform, session.clone(), test.clone(), integrations);
    let mut executed = 0usize;

    for (index, step) in entry.steps.iter().enumerate() {
        if step.is_screenshot() {
            continue;
        }
        if recorded_error(step) {
            let parsed = ToolCall::parse(&step.action.name, &step.action.input);
            if parsed.is_ok_and(|call| call.is_callback()) {
                adapter.skip_callback();
            }
            continue;
        }
        let stale = |reason: String| {
            tracing::info!(test = %test.name, step = index, reason = %reason, "replay.stale");
            ReplayOutcome::Stale {
                step: index,
                reason,
            }
        };

        let call = match ToolCall::parse(&step.action.name, &step.action.input) {
            Ok(call) => call,
            Err(e) => return stale(format!("unreadable step: {e}")),
        };

        if let (Some(expected), Some(at)) = (&step.extras.fingerprint, step.extras.coordinates) {
            let current = session.lock().await.locate_at(at.x as i64, at.y as i64).await;
            match current {
                Ok(Some(found)) if found.render() == expected.render() => {}
                Ok(Some(found)) => {
                    return stale(format!(
                        "element at {at} changed: expected {expected}, found {found}"
                    ))
                }
                Ok(None) => return stale(format!("no element at {at}; expected {expected}")),
                Err(e) => return stale(format!("could not inspect {at}: {e}")),
            }
        }

        let outcome = adapter.execute(&call).await;
        if outcome.is_error {
            return stale(format!("{} failed: {}", call.label(), outcome.text()));
        }
        executed += 1;
    }

    tracing::info!(test = %test.name, steps = executed, "replay.passed");
    ReplayOutcome::Passed {
        reason: REPLAY_PASS_REASON.to_string(),
    }
}
