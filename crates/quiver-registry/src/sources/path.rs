use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use quiver_core::archive::{archive_directory, is_valid_archive};
use quiver_core::model::{Artifact, Source};
use quiver_core::{expand_home, CoreError};

use super::SourceHandler;
use crate::context::FetchContext;
use crate::error::{FetchError, FetchResult};

/// Reads archives, or archives directories, from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct PathSource {
    /// Directory of the lock file; relative paths resolve against it.
    base_dir: Option<PathBuf>,
}

impl PathSource {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    /// Absolute, `~/`-relative, or relative to the lock file directory
    /// (the working directory when there is none).
    pub fn resolve(&self, raw: &str) -> PathBuf {
        if let Some(expanded) = expand_home(raw) {
            return expanded;
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.base_dir {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Archive bytes for `path`, read or built.
    pub async fn read_archive(&self, name: &str, path: &Path) -> FetchResult<Vec<u8>> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| FetchError::source(name, format!("{}: {}", path.display(), e)))?;

        if meta.is_dir() {
            debug!(name, path = %path.display(), "archiving directory");
            let dir = path.to_path_buf();
            let bytes = tokio::task::spawn_blocking(move || archive_directory(&dir))
                .await
                .map_err(|e| FetchError::source(name, format!("archive task failed: {}", e)))?
                .map_err(CoreError::from)?;
            return Ok(bytes);
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FetchError::source(name, format!("{}: {}", path.display(), e)))?;
        if !is_valid_archive(&bytes) {
            return Err(FetchError::integrity(
                name,
                format!("{} is not a zip archive", path.display()),
            ));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl SourceHandler for PathSource {
    async fn fetch(&self, artifact: &Artifact, _ctx: &FetchContext) -> FetchResult<Vec<u8>> {
        let Source::Path(spec) = &artifact.source else {
            return Err(FetchError::source(&artifact.name, "not a path source"));
        };
        let path = self.resolve(&spec.path);
        self.read_archive(&artifact.name, &path).await
    }
}
