use async_trait::async_trait;
use serde_json::json;
use sightline_agent::tools::COMPUTER_TOOL;
use sightline_agent::{assert_equal, callback, Orchestrator, TestDefinition, REPLAY_PASS_REASON};
use sightline_cache::ActionCache;
use sightline_common::{AiConfig, CacheConfig, Platform, Point, RetryConfig, ScreenshotConfig};
use sightline_drivers::sightline_browser::testing::FakeDevice;
use sightline_drivers::{Browser, BrowserOptions, DriverError, Session, SessionFactory};
use sightline_llm::testing::ScriptedLlm;
use sightline_runner::{Registry, ResultSource, Runner, RunSummary, TestStatus};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LOGIN_AT: Point = Point { x: 100, y: 200 };

struct FakeSessions {
    device: FakeDevice,
    shots: std::path::PathBuf,
    created: AtomicUsize,
    broken: AtomicBool,
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn create_session(&self) -> Result<Session, DriverError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(DriverError::Launch {
                binary: "chromedriver".to_string(),
                message: "not installed".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let options = BrowserOptions {
            default_sleep: Duration::from_millis(5),
            max_sleep: Duration::from_millis(20),
            screenshots: ScreenshotConfig {
                dir: self.shots.clone(),
                ..ScreenshotConfig::default()
            },
            ..BrowserOptions::default()
        };
        let browser = Browser::new(Box::new(self.device.backend(Platform::Web)), options);
        Ok(Session::new(browser))
    }
}

struct Fixture {
    device: FakeDevice,
    llm: ScriptedLlm,
    sessions: Arc<FakeSessions>,
    cache_config: CacheConfig,
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let device = FakeDevice::new();
        device.put_element(LOGIN_AT, "button", "login");
        let sessions = Arc::new(FakeSessions {
            device: device.clone(),
            shots: dir.path().join("shots"),
            created: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
        });
        let cache_config = CacheConfig {
            dir: dir.path().join("cache"),
            cleanup_probability: 0.0,
            lock_poll_ms: 5,
            ..CacheConfig::default()
        };
        Self {
            device,
            llm: ScriptedLlm::new(),
            sessions,
            cache_config,
            dir,
        }
    }

    fn orchestrator(&self) -> Arc<Orchestrator> {
        let retry = RetryConfig {
            max_retries: 2,
            backoff_ms: 1,
            rate_limit_cooldown_ms: 1,
        };
        Arc::new(Orchestrator::new(
            Arc::new(self.llm.clone()),
            AiConfig::default(),
            retry,
        ))
    }

    fn uncached(&self) -> Runner {
        Runner::new(self.sessions.clone(), self.orchestrator())
            .with_base_url(Some("https://app.test/".to_string()))
    }

    fn runner(&self) -> Runner {
        self.uncached().with_cache(self.cache())
    }

    fn cache(&self) -> ActionCache {
        ActionCache::new(&self.cache_config)
    }

    fn script_login(&self) {
        self.llm
            .push_tool(
                Some("Open the login form"),
                COMPUTER_TOOL,
                json!({ "action": "left_click", "coordinate": [LOGIN_AT.x, LOGIN_AT.y] }),
            )
            .push_tool(None, COMPUTER_TOOL, json!({ "action": "type", "text": "alice" }))
            .push_verdict(true, "Dashboard visible");
    }

    fn file(&self, name: &str, body: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }
}

fn login_registry() -> Registry {
    let mut registry = Registry::new();
    registry.test(TestDefinition::new("Login").expect("dashboard is visible"));
    registry
}

async fn run(runner: &Runner, registry: Registry) -> RunSummary {
    let mut summary = RunSummary::default();
    summary.push(runner.run_registry(Path::new("login.test.yaml"), registry).await);
    summary
}

#[tokio::test]
async fn first_run_is_live_and_second_replays_without_the_model() {
    let fx = Fixture::new();
    fx.script_login();

    let first = run(&fx.runner(), login_registry()).await;
    let result = &first.files[0].results[0];
    assert_eq!(result.status, TestStatus::Passed, "{result}");
    assert_eq!(result.source, ResultSource::Live);
    assert_eq!(result.reason, "Dashboard visible");
    assert_eq!(fx.llm.calls(), 3);

    let stored = fx
        .cache()
        .get(&TestDefinition::new("Login").expect("dashboard is visible").cache_key())
        .await
        .unwrap()
        .expect("passing trace stored");
    assert_eq!(stored.steps.len(), 2);

    fx.device.clear_actions();
    let second = run(&fx.runner(), login_registry()).await;
    let result = &second.files[0].results[0];
    assert_eq!(result.status, TestStatus::Passed, "{result}");
    assert_eq!(result.source, ResultSource::Replay);
    assert_eq!(result.reason, REPLAY_PASS_REASON);
    assert_eq!(fx.llm.calls(), 3);
    assert_eq!(fx.device.count("click leftx1 100,200"), 1);
    assert_eq!(fx.device.count("type alice"), 1);
    assert_eq!(second.exit_code(), 0);
}

#[tokio::test]
async fn stale_entry_is_replaced_by_one_live_run() {
    let fx = Fixture::new();
    fx.script_login();
    run(&fx.runner(), login_registry()).await;
    assert_eq!(fx.llm.calls(), 3);

    fx.device.put_element(LOGIN_AT, "a", "signup");
    fx.script_login();
    let summary = run(&fx.runner(), login_registry()).await;
    let result = &summary.files[0].results[0];
    assert_eq!(result.status, TestStatus::Passed, "{result}");
    assert_eq!(result.source, ResultSource::Live);
    assert_eq!(fx.llm.calls(), 6);
    assert_eq!(fx.llm.remaining(), 0);

    // The re-recorded trace matches the page as it is now.
    let third = run(&fx.runner(), login_registry()).await;
    assert_eq!(third.files[0].results[0].source, ResultSource::Replay);
    assert_eq!(fx.llm.calls(), 6);
}

#[tokio::test]
async fn failed_live_runs_are_not_cached() {
    let fx = Fixture::new();
    fx.llm
        .push_tool(None, COMPUTER_TOOL, json!({ "action": "screenshot" }))
        .push_verdict(false, "Error banner shown");

    let summary = run(&fx.runner(), login_registry()).await;
    let result = &summary.files[0].results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.reason, "Error banner shown");
    assert_eq!(summary.exit_code(), 1);

    let key = TestDefinition::new("Login").expect("dashboard is visible").cache_key();
    assert!(fx.cache().get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn without_a_cache_every_run_is_live() {
    let fx = Fixture::new();
    fx.script_login();
    fx.script_login();

    for _ in 0..2 {
        let summary = run(&fx.uncached(), login_registry()).await;
        assert_eq!(summary.files[0].results[0].source, ResultSource::Live);
    }
    assert_eq!(fx.llm.calls(), 6);
    assert!(!fx.cache_config.dir.join("cache.json").exists());
}

#[tokio::test]
async fn before_all_failure_fails_every_test_and_still_tears_down() {
    let fx = Fixture::new();
    let after_all_ran = Arc::new(AtomicBool::new(false));
    let flag = after_all_ran.clone();

    let mut registry = Registry::new();
    registry
        .before_all(callback(|_| async { anyhow::bail!("seed data unavailable") }))
        .after_all(callback(move |_| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        }))
        .test(TestDefinition::new("one"))
        .test(TestDefinition::new("two"));

    let summary = run(&fx.runner(), registry).await;
    let results = &summary.files[0].results;
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.source, ResultSource::Hooks);
        assert!(
            result.reason.contains("before_all hook failed: seed data unavailable"),
            "{}",
            result.reason
        );
    }
    assert_eq!(fx.llm.calls(), 0);
    assert!(after_all_ran.load(Ordering::SeqCst));
    assert!(fx.device.is_shut_down());
}

#[tokio::test]
async fn hooks_wrap_each_test_in_order() {
    let fx = Fixture::new();
    let log = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let hook = |label: &'static str| {
        let log = log.clone();
        callback(move |ctx| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{label}:{}", ctx.test_name));
                Ok(())
            }
        })
    };

    let mut registry = Registry::new();
    registry
        .before_all(hook("before_all"))
        .before_each(hook("before_each"))
        .after_each(hook("after_each"))
        .after_all(hook("after_all"))
        .test(TestDefinition::direct("a", hook("body")).before(hook("before")))
        .test(TestDefinition::direct("b", hook("body")).after(hook("after")));

    let summary = run(&fx.runner(), registry).await;
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "before_all:",
            "before_each:a",
            "before:a",
            "body:a",
            "after_each:a",
            "before_each:b",
            "body:b",
            "after:b",
            "after_each:b",
            "after_all:",
        ]
    );
}

#[tokio::test]
async fn direct_tests_skip_the_model_and_the_cache() {
    let fx = Fixture::new();
    let mut registry = Registry::new();
    registry
        .test(TestDefinition::direct(
            "opens docs",
            callback(|ctx| async move {
                ctx.session.lock().await.navigate("https://app.test/docs").await?;
                Ok::<_, anyhow::Error>(())
            }),
        ))
        .test(TestDefinition::direct(
            "counts items",
            callback(|_| async { assert_equal("item count", 3, 2) }),
        ));

    let summary = run(&fx.runner(), registry).await;
    let results = &summary.files[0].results;
    assert_eq!(results[0].status, TestStatus::Passed);
    assert_eq!(results[0].source, ResultSource::Direct);
    assert_eq!(results[0].reason, "Callback completed");
    assert_eq!(results[1].status, TestStatus::Failed);
    assert_eq!(results[1].reason, "item count (expected 3, actual 2)");
    assert_eq!(fx.llm.calls(), 0);
    assert!(!fx.cache_config.dir.join("cache.json").exists());
    assert_eq!(fx.device.count("open https://app.test/docs"), 1);
}

#[tokio::test]
async fn failing_after_hook_turns_a_pass_into_a_failure() {
    let fx = Fixture::new();
    let mut registry = Registry::new();
    registry
        .after_each(callback(|_| async { anyhow::bail!("logout button missing") }))
        .test(TestDefinition::direct("noop", callback(|_| async { Ok(()) })));

    let summary = run(&fx.runner(), registry).await;
    let result = &summary.files[0].results[0];
    assert_eq!(result.status, TestStatus::Failed);
    assert_eq!(result.source, ResultSource::Hooks);
    assert_eq!(result.reason, "after_each hook failed: logout button missing");
}

#[tokio::test]
async fn each_test_starts_from_the_base_url_on_a_clean_page() {
    let fx = Fixture::new();
    let mut registry = Registry::new();
    registry
        .set_base_url("https://staging.app.test/")
        .test(TestDefinition::direct("one", callback(|_| async { Ok(()) })))
        .test(TestDefinition::direct("two", callback(|_| async { Ok(()) })));

    run(&fx.runner(), registry).await;
    assert_eq!(fx.device.count("open https://staging.app.test/"), 2);
    assert_eq!(fx.device.count("open https://app.test/"), 0);
    assert_eq!(fx.device.count("clear_storage"), 3);
}

#[tokio::test]
async fn session_failures_fail_the_file() {
    let fx = Fixture::new();
    fx.sessions.broken.store(true, Ordering::SeqCst);

    let summary = run(&fx.runner(), login_registry()).await;
    let file = &summary.files[0];
    assert!(file.error.as_deref().unwrap().contains("not installed"));
    assert_eq!(file.results[0].source, ResultSource::Hooks);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(fx.llm.calls(), 0);
}

#[tokio::test]
async fn files_run_in_order_on_their_own_sessions() {
    let fx = Fixture::new();
    let good = fx.file(
        "a.test.yaml",
        "tests:\n  - name: Login\n    expectations:\n      - dashboard is visible\n",
    );
    let broken = fx.file("b.test.yaml", "tests: [\n");
    fx.script_login();

    let summary = fx.runner().run_files(&[good, broken]).await;
    assert_eq!(summary.files.len(), 2);
    assert!(summary.files[0].passed());
    assert!(summary.files[1].error.is_some());
    assert!(summary.files[1].results.is_empty());
    assert_eq!(fx.sessions.created.load(Ordering::SeqCst), 1);
    assert_eq!(summary.exit_code(), 1);
    assert!(summary.render().contains("1 passed, 0 failed, 1 total"));
}
