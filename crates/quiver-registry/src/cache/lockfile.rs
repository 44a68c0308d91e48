//! Cache of remote lock files, keyed by URL, with ETag revalidation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use quiver_core::QuiverConfig;

use super::write_atomic;
use crate::digest::url_key;
use crate::error::{FetchError, FetchResult};

/// ETags older than this are not sent; the next fetch is unconditional.
pub const ETAG_MAX_AGE_DAYS: i64 = 7;

/// Contents of `<url-key>.etag.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagRecord {
    pub url: String,
    pub etag: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LockfileCache {
    /// `<cache_dir>/lockfiles`.
    root: PathBuf,
}

impl LockfileCache {
    pub fn new(config: &QuiverConfig) -> Self {
        Self::with_dir(config.lockfiles_dir())
    }

    pub fn with_dir(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.lock", url_key(url)))
    }

    fn etag_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.etag.json", url_key(url)))
    }

    /// ETag to revalidate with, if one is recorded for `url` and still fresh.
    pub async fn etag(&self, url: &str) -> Option<String> {
        self.etag_at(url, Utc::now()).await
    }

    async fn etag_at(&self, url: &str, now: DateTime<Utc>) -> Option<String> {
        let raw = fs::read_to_string(self.etag_path(url)).await.ok()?;
        let record: EtagRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(url, error = %e, "ignoring unreadable etag record");
                return None;
            }
        };

        if record.url != url.trim() {
            return None;
        }
        if now - record.fetched_at > Duration::days(ETAG_MAX_AGE_DAYS) {
            debug!(url, fetched_at = %record.fetched_at, "etag expired");
            return None;
        }
        // Without the content a 304 could not be served.
        if !fs::try_exists(self.content_path(url)).await.unwrap_or(false) {
            return None;
        }
        Some(record.etag)
    }

    /// Cached lock file content for `url`.
    pub async fn load(&self, url: &str) -> FetchResult<Option<String>> {
        match fs::read_to_string(self.content_path(url)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::Cache {
                message: format!("failed to read cached lock file: {}", e),
            }),
        }
    }

    /// Store content, and the ETag when the server sent one.
    pub async fn store(&self, url: &str, content: &str, etag: Option<&str>) -> FetchResult<()> {
        write_atomic(&self.content_path(url), content.as_bytes()).await?;

        let etag_path = self.etag_path(url);
        match etag {
            Some(etag) => {
                let record = EtagRecord {
                    url: url.trim().to_string(),
                    etag: etag.to_string(),
                    fetched_at: Utc::now(),
                };
                let json = serde_json::to_vec_pretty(&record).map_err(|e| FetchError::Cache {
                    message: format!("failed to serialize etag record: {}", e),
                })?;
                write_atomic(&etag_path, &json).await?;
            }
            None => {
                let _ = fs::remove_file(&etag_path).await;
            }
        }

        debug!(url, etag = ?etag, "cached remote lock file");
        Ok(())
    }

    /// Refresh `fetched_at` after a 304.
    pub async fn touch(&self, url: &str) -> FetchResult<()> {
        let path = self.etag_path(url);
        let Ok(raw) = fs::read_to_string(&path).await else {
            return Ok(());
        };
        let Ok(mut record) = serde_json::from_str::<EtagRecord>(&raw) else {
            return Ok(());
        };
        record.fetched_at = Utc::now();
        let json = serde_json::to_vec_pretty(&record).map_err(|e| FetchError::Cache {
            message: format!("failed to serialize etag record: {}", e),
        })?;
        write_atomic(&path, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://example.com/team/quiver.lock";

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let cache = LockfileCache::with_dir(dir.path());

        assert!(cache.load(URL).await.unwrap().is_none());
        assert!(cache.etag(URL).await.is_none());

        cache.store(URL, "lock-version = 2", Some("\"v1\"")).await.unwrap();
        assert_eq!(cache.load(URL).await.unwrap().as_deref(), Some("lock-version = 2"));
        assert_eq!(cache.etag(URL).await.as_deref(), Some("\"v1\""));

        cache.store(URL, "lock-version = 2\n", None).await.unwrap();
        assert!(cache.etag(URL).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_etag_is_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = LockfileCache::with_dir(dir.path());
        cache.store(URL, "x", Some("\"v1\"")).await.unwrap();

        let now = Utc::now();
        assert!(cache.etag_at(URL, now + Duration::days(6)).await.is_some());
        assert!(cache.etag_at(URL, now + Duration::days(8)).await.is_none());
    }

    #[tokio::test]
    async fn test_etag_needs_content() {
        let dir = TempDir::new().unwrap();
        let cache = LockfileCache::with_dir(dir.path());
        cache.store(URL, "x", Some("\"v1\"")).await.unwrap();
        std::fs::remove_file(cache.content_path(URL)).unwrap();

        assert!(cache.etag(URL).await.is_none());
    }
}
