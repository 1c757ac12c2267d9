//! Cross-process advisory lock implemented as an exclusively created file.
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

/// Contents of the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    /// Unix millis.
    pub acquired_at: i64,
}

pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    poll: Duration,
    max_failures: u32,
    failures: AtomicU32,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration, poll: Duration, max_failures: u32) -> Self {
        Self {
            path: path.into(),
            timeout,
            poll: poll.max(Duration::from_millis(1)),
            max_failures: max_failures.max(1),
            failures: AtomicU32::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consecutive acquisitions that timed out.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Try to take the lock until the timeout elapses. `Ok(None)` means the
    /// lock is contended; after `max_failures` such results in a row the
    /// lock file is removed unconditionally.
    pub async fn acquire(&self) -> Result<Option<LockGuard>, CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.try_create().await {
                Ok(info) => {
                    self.failures.store(0, Ordering::SeqCst);
                    tracing::trace!(path = %self.path.display(), "cache.lock.acquired");
                    return Ok(Some(LockGuard {
                        path: self.path.clone(),
                        info,
                        released: false,
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.remove_if_stale().await {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.poll).await;
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            path = %self.path.display(),
            failures,
            timeout_ms = self.timeout.as_millis() as u64,
            "cache.lock.timeout"
        );
        if failures >= self.max_failures {
            self.force_release().await;
        }
        Ok(None)
    }

    async fn try_create(&self) -> std::io::Result<LockInfo> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: sightline_common::now_millis(),
        };
        let body = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
        file.write_all(&body).await?;
        file.flush().await?;
        Ok(info)
    }

    /// Age of the current lock holder, from its recorded timestamp or, when
    /// the file is unreadable, its modification time.
    async fn holder_age(&self) -> Option<Duration> {
        let now = sightline_common::now_millis();
        if let Ok(bytes) = tokio::fs::read(&self.path).await {
            if let Ok(info) = serde_json::from_slice::<LockInfo>(&bytes) {
                return Some(Duration::from_millis(now.saturating_sub(info.acquired_at).max(0) as u64));
            }
        }
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        let modified_ms = modified.duration_since(UNIX_EPOCH).ok()?.as_millis() as i64;
        Some(Duration::from_millis(now.saturating_sub(modified_ms).max(0) as u64))
    }

    async fn remove_if_stale(&self) -> bool {
        match self.holder_age().await {
            Some(age) if age > self.timeout => {
                match tokio::fs::remove_file(&self.path).await {
                    Ok(()) => {
                        tracing::info!(
                            path = %self.path.display(),
                            age_ms = age.as_millis() as u64,
                            "cache.lock.stale_removed"
                        );
                        true
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => true,
                    Err(e) => {
                        tracing::warn!(error = %e, "cache.lock.stale_remove_failed");
                        false
                    }
                }
            }
            _ => false,
        }
    }

    async fn force_release(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::warn!(path = %self.path.display(), "cache.lock.force_released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "cache.lock.force_release_failed"),
        }
        self.failures.store(0, Ordering::SeqCst);
    }
}

impl LockGuard {
    pub fn info(&self) -> LockInfo {
        self.info
    }

    fn holds(&self, contents: Option<Vec<u8>>) -> bool {
        contents
            .and_then(|b| serde_json::from_slice::<LockInfo>(&b).ok())
            .is_some_and(|held| held == self.info)
    }

    fn removed(&self, result: std::io::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, "cache.lock.release_failed");
        }
    }

    /// Remove the lock file if it is still ours.
    pub async fn release(mut self) {
        self.released = true;
        if self.holds(tokio::fs::read(&self.path).await.ok()) {
            self.removed(tokio::fs::remove_file(&self.path).await);
        } else {
            tracing::debug!(path = %self.path.display(), "cache.lock.taken_over");
        }
    }
}

/// Fallback for guards dropped without [`LockGuard::release`], e.g. on an
/// early `?` return.
impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.holds(std::fs::read(&self.path).ok()) {
            self.removed(std::fs::remove_file(&self.path));
        } else {
            tracing::debug!(path = %self.path.display(), "cache.lock.taken_over");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_in(dir: &Path, timeout_ms: u64) -> FileLock {
        FileLock::new(
            dir.join("cache.lock"),
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
            3,
        )
    }

    fn write_holder(path: &Path, acquired_at: i64) {
        let info = LockInfo {
            pid: 1,
            acquired_at,
        };
        std::fs::write(path, serde_json::to_vec(&info).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 100);
        let guard = lock.acquire().await.unwrap().unwrap();
        assert_eq!(guard.info().pid, std::process::id());
        assert!(lock.path().exists());

        guard.release().await;
        assert!(!lock.path().exists());
        assert!(lock.acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fresh_foreign_lock_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 50);
        write_holder(lock.path(), sightline_common::now_millis() + 60_000);
        assert!(lock.acquire().await.unwrap().is_none());
        assert_eq!(lock.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn stale_lock_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 100);
        write_holder(lock.path(), sightline_common::now_millis() - 60_000);

        let guard = lock.acquire().await.unwrap();
        assert!(guard.is_some());
        assert_eq!(lock.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn unreadable_lock_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 50);
        std::fs::write(lock.path(), b"garbage").unwrap();
        // Fresh mtime: contended at first, then stale once older than the timeout.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(lock.acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_timeouts_force_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 30);
        write_holder(lock.path(), sightline_common::now_millis() + 3_600_000);

        assert!(lock.acquire().await.unwrap().is_none());
        assert!(lock.acquire().await.unwrap().is_none());
        assert_eq!(lock.consecutive_failures(), 2);
        assert!(lock.acquire().await.unwrap().is_none());
        assert!(!lock.path().exists());
        assert_eq!(lock.consecutive_failures(), 0);

        assert!(lock.acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lock_file_records_the_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 100);
        let guard = lock.acquire().await.unwrap().unwrap();
        let on_disk: LockInfo =
            serde_json::from_slice(&tokio::fs::read(lock.path()).await.unwrap()).unwrap();
        assert_eq!(on_disk, guard.info());
        guard.release().await;
        assert!(!lock.path().exists());
    }

    #[tokio::test]
    async fn dropped_guard_still_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 100);
        drop(lock.acquire().await.unwrap().unwrap());
        assert!(!lock.path().exists());
    }

    #[tokio::test]
    async fn guard_does_not_remove_a_foreign_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(dir.path(), 100);
        let guard = lock.acquire().await.unwrap().unwrap();
        write_holder(lock.path(), sightline_common::now_millis());
        guard.release().await;
        assert!(lock.path().exists());
    }
}
