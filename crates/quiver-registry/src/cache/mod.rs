//! On-disk caches.
//!
//! # Cache Structure
//!
//! ```text
//! <cache_dir>/
//!   assets/{name}/{version}.zip     # AssetCache
//!   lockfiles/{url-key}.lock        # LockfileCache
//!   lockfiles/{url-key}.etag.json
//! ```
//!
//! Entries are written atomically. There is no cross-process lock; two
//! writers of the same entry produce identical bytes and the last rename wins.

mod io;
pub mod lockfile;

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use quiver_core::archive::is_valid_archive;
use quiver_core::QuiverConfig;

use crate::error::{FetchError, FetchResult};

pub use lockfile::{EtagRecord, LockfileCache};

pub(crate) use io::write_atomic;

const ARCHIVE_EXT: &str = "zip";

/// Cache of fetched artifact archives.
#[derive(Debug, Clone)]
pub struct AssetCache {
    /// `<cache_dir>/assets`.
    root: PathBuf,
}

impl AssetCache {
    /// Cache rooted at the configured `assets/` directory.
    pub fn new(config: &QuiverConfig) -> Self {
        Self::with_dir(config.assets_dir())
    }

    /// Create a cache with a custom directory.
    pub fn with_dir(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the archive for `name@version`.
    pub fn entry_path(&self, name: &str, version: &str) -> PathBuf {
        self.root
            .join(io::sanitize_component(name))
            .join(format!("{}.{}", io::sanitize_component(version), ARCHIVE_EXT))
    }

    /// Cached archive, or `None` on a miss.
    ///
    /// An entry that is not a valid archive is deleted and reported as a miss,
    /// so the caller fetches it again.
    pub async fn load(&self, name: &str, version: &str) -> FetchResult<Option<Vec<u8>>> {
        let path = self.entry_path(name, version);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(name, version, "cache miss");
                return Ok(None);
            }
            Err(e) => {
                return Err(FetchError::Cache {
                    message: format!("failed to read {}: {}", path.display(), e),
                })
            }
        };

        if !is_valid_archive(&bytes) {
            warn!(
                name,
                version,
                path = %path.display(),
                "cached archive is corrupt, evicting"
            );
            if let Err(e) = fs::remove_file(&path).await {
                warn!(error = %e, path = %path.display(), "failed to remove corrupt cache entry");
            }
            return Ok(None);
        }

        debug!(name, version, bytes = bytes.len(), "cache hit");
        Ok(Some(bytes))
    }

    /// Store an archive. Bytes that are not a valid archive are refused.
    pub async fn save(&self, name: &str, version: &str, archive: &[u8]) -> FetchResult<()> {
        if !is_valid_archive(archive) {
            return Err(FetchError::Cache {
                message: format!("refusing to cache invalid archive for {}@{}", name, version),
            });
        }

        let path = self.entry_path(name, version);
        write_atomic(&path, archive).await?;
        debug!(name, version, path = %path.display(), "cached archive");
        Ok(())
    }

    /// Whether an entry file exists. Validity is only checked by [`load`](Self::load).
    pub async fn contains(&self, name: &str, version: &str) -> bool {
        fs::try_exists(self.entry_path(name, version))
            .await
            .unwrap_or(false)
    }

    /// Remove one entry. Missing entries are not an error.
    pub async fn evict(&self, name: &str, version: &str) -> FetchResult<()> {
        let path = self.entry_path(name, version);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name, version, "evicted from cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FetchError::Cache {
                message: format!("failed to evict {}: {}", path.display(), e),
            }),
        }
    }

    /// Remove every cached archive.
    pub async fn clear(&self) -> FetchResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FetchError::Cache {
                message: format!("failed to clear cache: {}", e),
            }),
        }
    }

    /// `(name, version)` of every entry, sorted.
    pub async fn list(&self) -> FetchResult<Vec<(String, String)>> {
        let mut out = Vec::new();

        let mut names = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(FetchError::Cache {
                    message: format!("failed to read cache directory: {}", e),
                })
            }
        };

        while let Some(name_entry) = next_entry(&mut names).await? {
            if !name_entry.path().is_dir() {
                continue;
            }
            let name = name_entry.file_name().to_string_lossy().into_owned();

            let mut versions = fs::read_dir(name_entry.path())
                .await
                .map_err(|e| FetchError::Cache {
                    message: format!("failed to read cache directory: {}", e),
                })?;
            while let Some(version_entry) = next_entry(&mut versions).await? {
                let path = version_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXT) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push((name.clone(), stem.to_string()));
                }
            }
        }

        out.sort();
        Ok(out)
    }
}

async fn next_entry(dir: &mut fs::ReadDir) -> FetchResult<Option<fs::DirEntry>> {
    dir.next_entry().await.map_err(|e| FetchError::Cache {
        message: format!("failed to read cache directory: {}", e),
    })
}
