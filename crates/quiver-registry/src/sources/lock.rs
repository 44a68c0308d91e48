use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exclusive cross-process lock on a git clone. Released on drop.
///
/// The lock file lives outside the clone so `git clean` and re-clones never
/// touch it.
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    /// Poll for the lock until `timeout` elapses.
    pub async fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> FetchResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Git {
                    message: format!("failed to create lock directory: {}", e),
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FetchError::Git {
                message: format!("failed to open lock file {}: {}", path.display(), e),
            })?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), waited_ms = started.elapsed().as_millis(), "acquired repo lock");
                    return Ok(Self { file, path });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        warn!(path = %path.display(), ?waited, "timed out waiting for repo lock");
                        return Err(FetchError::LockTimeout { path, waited });
                    }
                    tokio::time::sleep(POLL_INTERVAL.min(timeout - waited)).await;
                }
                Err(e) => {
                    return Err(FetchError::Git {
                        message: format!("failed to lock {}: {}", path.display(), e),
                    })
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `EWOULDBLOCK` on unix, `ERROR_LOCK_VIOLATION` on windows.
fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock || (cfg!(windows) && err.raw_os_error() == Some(33))
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release repo lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks").join("repo.lock");

        let held = RepoLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        let err = RepoLock::acquire(&path, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::LockTimeout { .. }));

        drop(held);
        let again = RepoLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        assert_eq!(again.path(), path.as_path());
    }
}
