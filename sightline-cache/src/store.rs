use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::lock::FileLock;
use crate::merge::deep_merge;
use rand::Rng;
use serde_json::{Map, Value};
use sightline_common::CacheConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CACHE_FILE: &str = "cache.json";
pub const LOCK_FILE: &str = "cache.lock";

/// JSON map of [`CacheKey`] to [`CacheEntry`] stored in `<dir>/cache.json`.
pub struct ActionCache {
    path: PathBuf,
    lock: FileLock,
    ttl: Duration,
    cleanup_probability: f64,
}

impl ActionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::in_dir(&config.dir, config)
    }

    /// Cache rooted at `dir` with the remaining settings from `config`.
    pub fn in_dir(dir: &Path, config: &CacheConfig) -> Self {
        Self {
            path: dir.join(CACHE_FILE),
            lock: FileLock::new(
                dir.join(LOCK_FILE),
                config.lock_timeout(),
                config.lock_poll(),
                config.max_lock_failures,
            ),
            ttl: config.ttl(),
            cleanup_probability: config.cleanup_probability.clamp(0.0, 1.0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &FileLock {
        &self.lock
    }

    /// Read the whole file. Missing and corrupt files read as empty.
    async fn read_all(&self) -> Result<Map<String, Value>, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "cache.file.corrupt_reset");
                Ok(Map::new())
            }
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&Value::Object(map))?;
        let tmp = self.path.with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Look up `key`; `None` on a miss, an unreadable entry or lock contention.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let Some(guard) = self.lock.acquire().await? else {
            tracing::warn!(key = %key, "cache.get.skipped_lock_busy");
            return Ok(None);
        };
        let found = self.read_entry(key).await;
        guard.release().await;
        found
    }

    async fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let mut map = self.read_all().await?;
        let Some(raw) = map.remove(key.as_str()) else {
            tracing::debug!(key = %key, "cache.get.miss");
            return Ok(None);
        };
        match serde_json::from_value::<CacheEntry>(raw) {
            Ok(entry) => {
                tracing::debug!(key = %key, steps = entry.steps.len(), "cache.get.hit");
                Ok(Some(entry))
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache.get.bad_entry");
                Ok(None)
            }
        }
    }

    /// Deep-merge `entry` into whatever is stored under `key`.
    pub async fn set(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let Some(guard) = self.lock.acquire().await? else {
            tracing::warn!(key = %key, "cache.set.skipped_lock_busy");
            return Ok(());
        };
        let stored = self.merge_entry(key, entry).await;
        guard.release().await;
        stored
    }

    async fn merge_entry(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut map = self.read_all().await?;
        let incoming = serde_json::to_value(entry)?;
        match map.get_mut(key.as_str()) {
            Some(existing) => deep_merge(existing, incoming),
            None => {
                map.insert(key.to_string(), incoming);
            }
        }

        if rand::thread_rng().gen_bool(self.cleanup_probability) {
            let purged = purge(&mut map, self.ttl);
            if purged > 0 {
                tracing::info!(purged, "cache.evict.expired");
            }
        }

        self.write_all(map).await?;
        tracing::debug!(key = %key, steps = entry.steps.len(), "cache.set.stored");
        Ok(())
    }

    /// Remove `key`; returns whether an entry was removed.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let Some(guard) = self.lock.acquire().await? else {
            tracing::warn!(key = %key, "cache.delete.skipped_lock_busy");
            return Ok(false);
        };
        let removed = self.remove_entry(key).await;
        guard.release().await;
        removed
    }

    async fn remove_entry(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut map = self.read_all().await?;
        let removed = map.remove(key.as_str()).is_some();
        if removed {
            self.write_all(map).await?;
            tracing::info!(key = %key, "cache.delete.removed");
        }
        Ok(removed)
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let Some(guard) = self.lock.acquire().await? else {
            return Ok(0);
        };
        let purged = self.purge_file().await;
        guard.release().await;
        purged
    }

    async fn purge_file(&self) -> Result<usize, CacheError> {
        let mut map = self.read_all().await?;
        let purged = purge(&mut map, self.ttl);
        if purged > 0 {
            self.write_all(map).await?;
        }
        Ok(purged)
    }
}

fn purge(map: &mut Map<String, Value>, ttl: Duration) -> usize {
    let now = sightline_common::now_millis();
    let ttl_ms = ttl.as_millis() as i64;
    let before = map.len();
    map.retain(|_, raw| {
        let timestamp = raw.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
        now.saturating_sub(timestamp) <= ttl_ms
    });
    before - map.len()
}
