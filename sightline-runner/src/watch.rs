//! File watching for `--watch`.
use crate::discovery::is_test_file;
use crate::error::RunnerError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Emits batches of changed test files under one directory.
pub struct TestWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    suffix: String,
    pattern: Option<Regex>,
    debounce: Duration,
}

impl TestWatcher {
    pub fn new(
        dir: &Path,
        suffix: impl Into<String>,
        pattern: Option<Regex>,
        debounce: Duration,
    ) -> Result<Self, RunnerError> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(dir, RecursiveMode::Recursive)?;
        tracing::info!(dir = %dir.display(), "runner.watch.started");
        Ok(Self {
            _watcher: watcher,
            events,
            suffix: suffix.into(),
            pattern,
            debounce,
        })
    }

    /// Wait for the next batch of changed files. Events arriving within the
    /// debounce window join the batch. `None` once cancelled.
    pub async fn next_batch(&mut self, cancel: &CancellationToken) -> Option<Vec<PathBuf>> {
        let mut changed = BTreeSet::new();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return None,
                event = self.events.recv() => event?,
            };
            collect(event, &self.suffix, self.pattern.as_ref(), &mut changed);
            if changed.is_empty() {
                continue;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.debounce) => break,
                    event = self.events.recv() => match event {
                        Some(event) => collect(event, &self.suffix, self.pattern.as_ref(), &mut changed),
                        None => break,
                    },
                }
            }
            tracing::info!(files = changed.len(), "runner.watch.changed");
            return Some(changed.into_iter().collect());
        }
    }
}

fn collect(
    event: notify::Result<Event>,
    suffix: &str,
    pattern: Option<&Regex>,
    into: &mut BTreeSet<PathBuf>,
) {
    match event {
        Ok(event) if is_content_change(&event.kind) => {
            into.extend(
                event
                    .paths
                    .into_iter()
                    .filter(|p| p.is_file() && is_test_file(p, suffix, pattern)),
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "runner.watch.event_error"),
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}
