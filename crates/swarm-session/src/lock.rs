use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use swarm_core::{SwarmError, SwarmResult};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Exclusive per-session lock backed by a lock file.
///
/// The file is created with `create_new`, so acquisition is atomic across
/// processes. It is removed when the guard is dropped.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Acquire the lock at `path`, retrying with backoff until `timeout`.
    ///
    /// A lock file older than `stale_after` is assumed to belong to a crashed
    /// holder and is broken.
    pub async fn acquire(
        path: impl Into<PathBuf>,
        timeout: Duration,
        stale_after: Duration,
    ) -> SwarmResult<Self> {
        let path = path.into();
        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let stamp = format!("{}\n", std::process::id());
                    file.write_all(stamp.as_bytes()).await?;
                    debug!(lock = %path.display(), "Session lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path, stale_after).await {
                        warn!(lock = %path.display(), "Breaking stale session lock");
                        match tokio::fs::remove_file(&path).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(SwarmError::StateConflict(format!(
                            "timed out after {}ms waiting for lock {}",
                            timeout.as_millis(),
                            path.display()
                        )));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "Failed to release session lock");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".lock");
        let held = SessionLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(path.exists());

        let err = SessionLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::StateConflict(_)));

        drop(held);
        assert!(!path.exists());
        SessionLock::acquire(&path, Duration::from_millis(50), Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".lock");
        let held = SessionLock::acquire(&path, Duration::from_secs(1), Duration::from_secs(60))
            .await
            .unwrap();

        let waiter_path = path.clone();
        let waiter = tokio::spawn(async move {
            SessionLock::acquire(waiter_path, Duration::from_secs(5), Duration::from_secs(60)).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".lock");
        std::fs::write(&path, "12345\n").unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let lock = SessionLock::acquire(&path, Duration::from_millis(100), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(lock.path(), path.as_path());
    }
}
