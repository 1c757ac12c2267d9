use serde_json::{json, Value};
use sightline_cache::{ActionCache, CacheEntry, CacheKey, CacheStep, LockInfo, StepAction, StepExtras};
use sightline_common::{CacheConfig, Point};
use std::path::Path;

fn config(dir: &Path) -> CacheConfig {
    CacheConfig {
        dir: dir.to_path_buf(),
        lock_timeout_ms: 5_000,
        lock_poll_ms: 5,
        cleanup_probability: 0.0,
        ..CacheConfig::default()
    }
}

fn step(name: &str, input: Value) -> CacheStep {
    CacheStep {
        action: StepAction {
            name: name.to_string(),
            input,
        },
        reasoning: Some(format!("doing {name}")),
        result: json!({ "output": "ok" }),
        extras: StepExtras::default(),
        timestamp: sightline_common::now_millis(),
    }
}

fn key(name: &str) -> CacheKey {
    CacheKey::for_test(name, None, ["it works"])
}

#[tokio::test]
async fn set_then_get_round_trips_steps() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ActionCache::new(&config(dir.path()));
    let mut click = step("computer", json!({ "action": "left_click", "coordinate": [10, 20] }));
    click.extras.coordinates = Some(Point::new(10, 20));
    let entry = CacheEntry::new(vec![click, step("sleep", json!({ "duration": 100 }))]);

    assert!(cache.get(&key("login")).await.unwrap().is_none());
    cache.set(&key("login"), &entry).await.unwrap();

    let loaded = cache.get(&key("login")).await.unwrap().unwrap();
    assert_eq!(loaded, entry);
    assert!(!cache.lock().path().exists(), "lock must be released");
}

#[tokio::test]
async fn concurrent_writers_keep_every_key() {
    let dir = tempfile::tempdir().unwrap();
    let writers = (0..8).map(|i| {
        let cfg = config(dir.path());
        tokio::spawn(async move {
            // Separate instances stand in for separate processes.
            let cache = ActionCache::new(&cfg);
            let entry = CacheEntry::new(vec![step("sleep", json!({ "duration": i }))]);
            cache.set(&key(&format!("test-{i}")), &entry).await.unwrap();
        })
    });
    for handle in futures::future::join_all(writers).await {
        handle.unwrap();
    }

    let cache = ActionCache::new(&config(dir.path()));
    for i in 0..8 {
        let entry = cache.get(&key(&format!("test-{i}"))).await.unwrap().unwrap();
        assert_eq!(entry.steps[0].action.input["duration"], i);
    }
}

#[tokio::test]
async fn concurrent_writers_to_one_key_merge_their_updates() {
    let dir = tempfile::tempdir().unwrap();
    let writers = (0..6usize).map(|i| {
        let cfg = config(dir.path());
        tokio::spawn(async move {
            let cache = ActionCache::new(&cfg);
            // Writer i contributes i + 1 steps, each tagged with its own result field.
            let steps = (0..=i)
                .map(|_| {
                    let mut s = step("sleep", json!({ "duration": 10 }));
                    s.result = Value::Object(serde_json::Map::from_iter([(format!("w{i}"), json!(true))]));
                    s
                })
                .collect();
            cache.set(&key("shared"), &CacheEntry::new(steps)).await.unwrap();
        })
    });
    for handle in futures::future::join_all(writers).await {
        handle.unwrap();
    }

    let merged = ActionCache::new(&config(dir.path()))
        .get(&key("shared"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(merged.steps.len(), 6);
    for i in 0..6 {
        assert_eq!(merged.steps[0].result[format!("w{i}")], true, "writer {i} lost");
    }
    assert_eq!(merged.steps[5].result["w5"], true);
    assert!(merged.steps[5].result.get("w0").is_none());
}

#[tokio::test]
async fn writes_merge_into_existing_entry() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ActionCache::new(&config(dir.path()));
    let first = CacheEntry::new(vec![
        step("navigate", json!({ "url": "https://example.com" })),
        step("sleep", json!({ "duration": 1 })),
    ]);
    cache.set(&key("merge"), &first).await.unwrap();

    let mut second = CacheEntry::new(vec![step("navigate", json!({ "url": "https://example.org" }))]);
    second.steps[0].reasoning = None;
    cache.set(&key("merge"), &second).await.unwrap();

    let merged = cache.get(&key("merge")).await.unwrap().unwrap();
    assert_eq!(merged.steps.len(), 2);
    assert_eq!(merged.steps[0].action.input["url"], "https://example.org");
    assert_eq!(merged.steps[0].reasoning.as_deref(), Some("doing navigate"));
    assert_eq!(merged.steps[1].action.name, "sleep");
}

#[tokio::test]
async fn delete_removes_only_that_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ActionCache::new(&config(dir.path()));
    let entry = CacheEntry::new(vec![step("sleep", json!({}))]);
    cache.set(&key("a"), &entry).await.unwrap();
    cache.set(&key("b"), &entry).await.unwrap();

    assert!(cache.delete(&key("a")).await.unwrap());
    assert!(!cache.delete(&key("a")).await.unwrap());
    assert!(cache.get(&key("a")).await.unwrap().is_none());
    assert!(cache.get(&key("b")).await.unwrap().is_some());
}

#[tokio::test]
async fn corrupt_file_reads_as_empty_and_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ActionCache::new(&config(dir.path()));
    std::fs::write(cache.path(), b"{ not json").unwrap();

    assert!(cache.get(&key("x")).await.unwrap().is_none());
    cache
        .set(&key("x"), &CacheEntry::new(vec![step("sleep", json!({}))]))
        .await
        .unwrap();

    let raw: Value = serde_json::from_slice(&std::fs::read(cache.path()).unwrap()).unwrap();
    assert!(raw.get(key("x").as_str()).is_some());
}

#[tokio::test]
async fn stale_lock_from_dead_process_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CacheConfig {
        lock_timeout_ms: 200,
        ..config(dir.path())
    };
    let cache = ActionCache::new(&cfg);
    let stale = LockInfo {
        pid: 999_999,
        acquired_at: sightline_common::now_millis() - 10_000,
    };
    std::fs::write(cache.lock().path(), serde_json::to_vec(&stale).unwrap()).unwrap();

    cache
        .set(&key("after-crash"), &CacheEntry::new(vec![step("sleep", json!({}))]))
        .await
        .unwrap();
    assert!(cache.get(&key("after-crash")).await.unwrap().is_some());
}

#[tokio::test]
async fn busy_lock_degrades_to_no_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CacheConfig {
        lock_timeout_ms: 30,
        ..config(dir.path())
    };
    let cache = ActionCache::new(&cfg);
    cache
        .set(&key("busy"), &CacheEntry::new(vec![step("sleep", json!({}))]))
        .await
        .unwrap();

    let holder = LockInfo {
        pid: 1,
        acquired_at: sightline_common::now_millis() + 3_600_000,
    };
    std::fs::write(cache.lock().path(), serde_json::to_vec(&holder).unwrap()).unwrap();

    assert!(cache.get(&key("busy")).await.unwrap().is_none());
    assert!(!cache.delete(&key("busy")).await.unwrap());
    // Third consecutive timeout forces the lock open.
    assert!(cache.get(&key("busy")).await.unwrap().is_none());
    assert!(cache.get(&key("busy")).await.unwrap().is_some());
}

#[tokio::test]
async fn expired_entries_are_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CacheConfig {
        ttl_secs: 60,
        cleanup_probability: 1.0,
        ..config(dir.path())
    };
    let cache = ActionCache::new(&cfg);
    let mut old = CacheEntry::new(vec![step("sleep", json!({}))]);
    old.timestamp -= 120_000;
    cache.set(&key("old"), &old).await.unwrap();
    // The write of "old" itself purged it.
    assert!(cache.get(&key("old")).await.unwrap().is_none());

    let never = ActionCache::new(&CacheConfig {
        cleanup_probability: 0.0,
        ..cfg.clone()
    });
    never.set(&key("old"), &old).await.unwrap();
    never
        .set(&key("fresh"), &CacheEntry::new(vec![step("sleep", json!({}))]))
        .await
        .unwrap();
    assert_eq!(never.purge_expired().await.unwrap(), 1);
    assert!(never.get(&key("fresh")).await.unwrap().is_some());
}
