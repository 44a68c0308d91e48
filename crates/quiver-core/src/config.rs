//! Cache location and on-disk layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding the cache base directory.
pub const CACHE_DIR_ENV: &str = "QUIVER_CACHE_DIR";

/// Environment variable overriding the global install target.
pub const GLOBAL_TARGET_ENV: &str = "QUIVER_GLOBAL_TARGET";

/// Paths shared by the caches and the install tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuiverConfig {
    /// Base directory for every cache.
    pub cache_dir: PathBuf,

    /// The canonical global install target; its tracker file is `global.json`.
    #[serde(default)]
    pub global_target: Option<PathBuf>,
}

impl QuiverConfig {
    /// Use an explicit base directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            global_target: dirs::home_dir(),
        }
    }

    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `QUIVER_CACHE_DIR` | Cache base directory |
    /// | `QUIVER_GLOBAL_TARGET` | Global install target (default: home directory) |
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_dir = match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_cache_dir()?,
        };
        let global_target = std::env::var_os(GLOBAL_TARGET_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir);

        Ok(Self {
            cache_dir,
            global_target,
        })
    }

    pub fn with_global_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.global_target = Some(target.into());
        self
    }

    /// `assets/`: one zip per `name/version`.
    pub fn assets_dir(&self) -> PathBuf {
        self.cache_dir.join("assets")
    }

    /// `git-repos/`: one clone per repository URL hash.
    pub fn git_repos_dir(&self) -> PathBuf {
        self.cache_dir.join("git-repos")
    }

    /// `git-repos/locks/`: lock files live beside, not inside, the clones.
    pub fn git_locks_dir(&self) -> PathBuf {
        self.git_repos_dir().join("locks")
    }

    pub fn lockfiles_dir(&self) -> PathBuf {
        self.cache_dir.join("lockfiles")
    }

    pub fn installed_state_dir(&self) -> PathBuf {
        self.cache_dir.join("installed-state")
    }

    pub fn global_target(&self) -> Option<&Path> {
        self.global_target.as_deref()
    }
}

/// `dirs::cache_dir()/quiver`, falling back to the home directory.
pub fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .ok_or(ConfigError::NoCacheDir)?;
    Ok(base.join("quiver"))
}
