//! Executes a test file: one session, hooks, cache-first with live fallback.
use crate::registry::Registry;
use crate::report::{FileReport, ResultSource, RunSummary, TestResult};
use crate::testfile::TestFile;
use sightline_agent::{
    replay, AssertionFailed, Callback, Integrations, Orchestrator, ReplayOutcome, TestContext,
    TestDefinition,
};
use sightline_cache::{ActionCache, CacheEntry, CacheKey};
use sightline_drivers::{SessionFactory, SessionHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

struct Outcome {
    passed: bool,
    reason: String,
    source: ResultSource,
}

impl Outcome {
    fn new(passed: bool, reason: impl Into<String>, source: ResultSource) -> Self {
        Self {
            passed,
            reason: reason.into(),
            source,
        }
    }
}

pub struct Runner {
    sessions: Arc<dyn SessionFactory>,
    orchestrator: Arc<Orchestrator>,
    cache: Option<ActionCache>,
    integrations: Integrations,
    base_url: Option<String>,
}

impl Runner {
    pub fn new(sessions: Arc<dyn SessionFactory>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            sessions,
            orchestrator,
            cache: None,
            integrations: Integrations::default(),
            base_url: None,
        }
    }

    /// Enable cache-first execution. Without a cache every test runs live.
    pub fn with_cache(mut self, cache: ActionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Integrations used when replaying cached `github_login`/`check_email` steps.
    pub fn with_integrations(mut self, integrations: Integrations) -> Self {
        self.integrations = integrations;
        self
    }

    pub fn with_base_url(mut self, url: Option<String>) -> Self {
        self.base_url = url;
        self
    }

    /// Run every file in order; one file's failure never stops the rest.
    pub async fn run_files(&self, files: &[impl AsRef<Path>]) -> RunSummary {
        let mut summary = RunSummary::default();
        for path in files {
            summary.push(self.run_file(path.as_ref()).await);
        }
        summary
    }

    pub async fn run_file(&self, path: &Path) -> FileReport {
        match TestFile::load(path).await {
            Ok(file) => self.run_registry(path, file.into_registry()).await,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "runner.file.invalid");
                FileReport::failed(path, e.to_string())
            }
        }
    }

    /// Execute one file's registry on a fresh session. The session is
    /// destroyed on every path out of this function.
    pub async fn run_registry(&self, path: &Path, registry: Registry) -> FileReport {
        let mut report = FileReport::new(path);
        tracing::info!(path = %path.display(), tests = registry.len(), "runner.file.start");

        let mut session = match self.sessions.create_session().await {
            Ok(session) => session,
            Err(e) => {
                let reason = format!("could not create a session: {e}");
                tracing::error!(path = %path.display(), error = %e, "runner.session.failed");
                report.results = fail_all(&registry, &reason);
                report.error = Some(reason);
                return report;
            }
        };

        let handle = session.handle();
        let base_url = registry.base_url().or(self.base_url.as_deref());

        match session.start(None).await {
            Ok(()) => {
                report.results = self.run_tests(&registry, &handle, base_url).await;
            }
            Err(e) => {
                let reason = format!("could not start the session: {e}");
                report.results = fail_all(&registry, &reason);
                report.error = Some(reason);
            }
        }

        if let Err(e) = session.destroy().await {
            tracing::warn!(session = %session.id(), error = %e, "runner.session.destroy_failed");
        }
        let passed = report.results.iter().filter(|r| r.passed()).count();
        tracing::info!(
            path = %path.display(),
            passed,
            failed = report.results.len() - passed,
            "runner.file.done"
        );
        report
    }

    async fn run_tests(
        &self,
        registry: &Registry,
        handle: &SessionHandle,
        base_url: Option<&str>,
    ) -> Vec<TestResult> {
        let file_ctx = TestContext {
            session: handle.clone(),
            test_name: String::new(),
            payload: None,
        };

        let results = match run_hooks("before_all", &registry.before_all, &file_ctx).await {
            Err(reason) => fail_all(registry, &reason),
            Ok(()) => {
                let mut results = Vec::with_capacity(registry.len());
                for test in registry.tests() {
                    results.push(self.run_one(registry, test, handle, base_url).await);
                }
                results
            }
        };

        if let Err(reason) = run_hooks("after_all", &registry.after_all, &file_ctx).await {
            tracing::warn!(reason = %reason, "runner.hook.after_all_failed");
        }
        results
    }

    async fn run_one(
        &self,
        registry: &Registry,
        test: &Arc<TestDefinition>,
        handle: &SessionHandle,
        base_url: Option<&str>,
    ) -> TestResult {
        let started = Instant::now();
        let ctx = test.context(handle.clone());
        tracing::info!(test = %test.name, "runner.test.start");

        let before = run_hooks("before_each", &registry.before_each, &ctx).await;
        let before = match before {
            Ok(()) => run_hooks("before", &test.before, &ctx).await,
            err => err,
        };

        let mut outcome = match before {
            Err(reason) => Outcome::new(false, reason, ResultSource::Hooks),
            Ok(()) => match self.open_start_page(handle, base_url).await {
                Err(reason) => Outcome::new(false, reason, ResultSource::Hooks),
                Ok(()) => self.execute(test, handle).await,
            },
        };

        for (label, hooks) in [("after", &test.after), ("after_each", &registry.after_each)] {
            if let Err(reason) = run_hooks(label, hooks, &ctx).await {
                if outcome.passed {
                    outcome = Outcome::new(false, reason, ResultSource::Hooks);
                } else {
                    tracing::warn!(test = %test.name, reason = %reason, "runner.hook.after_failed");
                }
            }
        }

        if let Err(e) = handle.lock().await.cleanup().await {
            tracing::warn!(test = %test.name, error = %e, "runner.test.cleanup_failed");
        }

        let result = TestResult::new(
            test.name.clone(),
            outcome.passed,
            outcome.reason,
            outcome.source,
            started.elapsed(),
        );
        if result.passed() {
            tracing::info!(test = %result.name, source = %result.source, ms = result.duration_ms, "runner.test.passed");
        } else {
            tracing::warn!(test = %result.name, source = %result.source, reason = %result.reason, "runner.test.failed");
        }
        result
    }

    async fn open_start_page(
        &self,
        handle: &SessionHandle,
        base_url: Option<&str>,
    ) -> Result<(), String> {
        let Some(url) = base_url else {
            return Ok(());
        };
        handle
            .lock()
            .await
            .navigate(url)
            .await
            .map(|_| ())
            .map_err(|e| format!("could not open {url}: {e}"))
    }

    async fn execute(&self, test: &Arc<TestDefinition>, handle: &SessionHandle) -> Outcome {
        if test.direct {
            return run_direct(test, handle).await;
        }
        let Some(cache) = self.cache.as_ref() else {
            return self.live(test, handle, None).await;
        };

        let key = test.cache_key();
        let cached = match cache.get(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(test = %test.name, error = %e, "runner.cache.read_failed");
                None
            }
        };
        let Some(entry) = cached else {
            tracing::debug!(test = %test.name, key = %key, "runner.cache.miss");
            return self.live(test, handle, Some((cache, &key))).await;
        };

        match replay(&entry, test.clone(), handle.clone(), self.integrations.clone()).await {
            ReplayOutcome::Passed { reason } => Outcome::new(true, reason, ResultSource::Replay),
            ReplayOutcome::Stale { step, reason } => {
                tracing::warn!(test = %test.name, step, reason = %reason, "runner.cache.stale");
                if let Err(e) = cache.delete(&key).await {
                    tracing::warn!(test = %test.name, error = %e, "runner.cache.delete_failed");
                }
                // No second lookup: the fresh trace is stored only if this run passes.
                self.live(test, handle, Some((cache, &key))).await
            }
        }
    }

    /// Run the orchestrator; a passing trace is written to `store` when given.
    async fn live(
        &self,
        test: &Arc<TestDefinition>,
        handle: &SessionHandle,
        store: Option<(&ActionCache, &CacheKey)>,
    ) -> Outcome {
        let run = match self.orchestrator.run(test.clone(), handle.clone()).await {
            Ok(run) => run,
            Err(e) => return Outcome::new(false, e.to_string(), ResultSource::Live),
        };

        if let (true, Some((cache, key))) = (run.verdict.passed, store) {
            if run.trace.is_empty() {
                tracing::debug!(test = %test.name, "runner.cache.empty_trace_skipped");
            } else if let Err(e) = cache.set(key, &CacheEntry::new(run.trace)).await {
                tracing::warn!(test = %test.name, error = %e, "runner.cache.write_failed");
            }
        }
        Outcome::new(run.verdict.passed, run.verdict.reason, ResultSource::Live)
    }
}

async fn run_direct(test: &Arc<TestDefinition>, handle: &SessionHandle) -> Outcome {
    let Some(cb) = &test.callback else {
        return Outcome::new(false, "direct test has no callback", ResultSource::Direct);
    };
    match cb(test.context(handle.clone())).await {
        Ok(()) => Outcome::new(true, "Callback completed", ResultSource::Direct),
        Err(e) => Outcome::new(false, describe_error(&e), ResultSource::Direct),
    }
}

async fn run_hooks(label: &str, hooks: &[Callback], ctx: &TestContext) -> Result<(), String> {
    for (i, hook) in hooks.iter().enumerate() {
        if let Err(e) = hook(ctx.clone()).await {
            tracing::warn!(hook = label, index = i, error = %format!("{e:#}"), "runner.hook.failed");
            return Err(format!("{label} hook failed: {}", describe_error(&e)));
        }
    }
    Ok(())
}

fn describe_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<AssertionFailed>() {
        Some(a) => format!("{} (expected {}, actual {})", a.message, a.expected, a.actual),
        None => format!("{err:#}"),
    }
}

fn fail_all(registry: &Registry, reason: &str) -> Vec<TestResult> {
    registry
        .tests()
        .iter()
        .map(|t| {
            TestResult::new(
                t.name.clone(),
                false,
                reason,
                ResultSource::Hooks,
                std::time::Duration::ZERO,
            )
        })
        .collect()
}
