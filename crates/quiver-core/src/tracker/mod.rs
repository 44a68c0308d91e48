//! Install tracker: the record of what is installed where.
//!
//! Each target directory maps to a *scope key* and its own JSON file under
//! `installed-state/`, so the global target and per-repository targets never
//! share storage:
//!
//! ```text
//! ~/.cache/quiver/installed-state/
//! ├── global.json
//! └── 3f2a9c0d81b4e6f7.json
//! ```

mod diff;
mod reconcile;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::fsutil::write_atomic;
use crate::model::ArtifactType;
use crate::scope::{normalize_scope_path, repos_equivalent};

pub use diff::{
    find_artifacts_to_install_for_clients, find_changed_or_new_artifacts, find_removed_artifacts,
};
pub use reconcile::{
    reconcile, validate_installed_state, InstalledScanner, ReconcileResult, VersionMismatch,
};

/// Current tracker file format.
pub const TRACKER_FORMAT_VERSION: u32 = 1;

/// Scope key of the canonical global target.
pub const GLOBAL_SCOPE_KEY: &str = "global";

/// One installed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledArtifact {
    pub name: String,
    pub version: String,

    #[serde(rename = "type")]
    pub kind: ArtifactType,

    #[serde(default)]
    pub install_path: String,

    #[serde(default)]
    pub clients: Vec<String>,

    /// Repository URL for repo/path scoped installs; empty when global.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl InstalledArtifact {
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            name: self.name.clone(),
            repository: self.repository.clone(),
            path: self.path.clone(),
        }
    }
}

/// Identity of an installation: the same name in two scopes is two installs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub name: String,
    pub repository: String,
    pub path: String,
}

impl ArtifactKey {
    pub fn new(name: impl Into<String>, repository: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            path: path.into(),
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, "", "")
    }
}

/// Persisted tracker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerFile {
    pub version: u32,

    /// Content version of the lock file last installed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file_version: Option<String>,

    pub installed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub artifacts: Vec<InstalledArtifact>,
}

impl Default for TrackerFile {
    fn default() -> Self {
        Self {
            version: TRACKER_FORMAT_VERSION,
            lock_file_version: None,
            installed_at: Utc::now(),
            updated_at: None,
            artifacts: Vec::new(),
        }
    }
}

/// Derive the scope key for `target`. The canonical global target maps to
/// [`GLOBAL_SCOPE_KEY`]; anything else to 16 hex chars of sha256(path).
pub fn scope_key(target: &Path, global_target: Option<&Path>) -> String {
    let target = canonical(target);
    if let Some(global) = global_target {
        if canonical(global) == target {
            return GLOBAL_SCOPE_KEY.to_string();
        }
    }
    let digest = Sha256::digest(target.to_string_lossy().as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Tracker bound to one target directory.
#[derive(Debug)]
pub struct InstallTracker {
    path: PathBuf,
    scope_key: String,
    target: PathBuf,
    file: TrackerFile,
}

impl InstallTracker {
    /// Open (or start) the tracker for `target` under `state_dir`.
    pub fn open(
        state_dir: &Path,
        target: &Path,
        global_target: Option<&Path>,
    ) -> Result<Self, TrackerError> {
        let scope_key = scope_key(target, global_target);
        let path = state_dir.join(format!("{}.json", scope_key));
        let file = Self::read_file(&path)?;

        debug!(
            scope_key = %scope_key,
            artifacts = file.artifacts.len(),
            "opened install tracker"
        );

        Ok(Self {
            path,
            scope_key,
            target: target.to_path_buf(),
            file,
        })
    }

    fn read_file(path: &Path) -> Result<TrackerFile, TrackerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TrackerFile::default()),
            Err(source) => {
                return Err(TrackerError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let file: TrackerFile =
            serde_json::from_str(&content).map_err(|e| TrackerError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if file.version > TRACKER_FORMAT_VERSION {
            return Err(TrackerError::UnsupportedFormat {
                found: file.version,
                supported: TRACKER_FORMAT_VERSION,
            });
        }
        Ok(file)
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn artifacts(&self) -> &[InstalledArtifact] {
        &self.file.artifacts
    }

    pub fn lock_file_version(&self) -> Option<&str> {
        self.file.lock_file_version.as_deref()
    }

    pub fn set_lock_file_version(&mut self, version: impl Into<String>) {
        self.file.lock_file_version = Some(version.into());
    }

    /// Replace the entry with the same key, or append.
    pub fn upsert_artifact(&mut self, artifact: InstalledArtifact) {
        let key = artifact.key();
        match self.file.artifacts.iter_mut().find(|a| a.key() == key) {
            Some(existing) => *existing = artifact,
            None => self.file.artifacts.push(artifact),
        }
        self.file.updated_at = Some(Utc::now());
    }

    pub fn find_artifact(&self, key: &ArtifactKey) -> Option<&InstalledArtifact> {
        self.file.artifacts.iter().find(|a| a.key() == *key)
    }

    pub fn remove_artifact(&mut self, key: &ArtifactKey) -> bool {
        let before = self.file.artifacts.len();
        self.file.artifacts.retain(|a| a.key() != *key);
        let removed = self.file.artifacts.len() != before;
        if removed {
            self.file.updated_at = Some(Utc::now());
        }
        removed
    }

    /// Like [`find_artifact`](Self::find_artifact) but with a caller-chosen
    /// repository equivalence, e.g. [`repos_equivalent`].
    pub fn find_artifact_with_matcher<F>(
        &self,
        name: &str,
        repository: &str,
        path: &str,
        repo_eq: F,
    ) -> Option<&InstalledArtifact>
    where
        F: Fn(&str, &str) -> bool,
    {
        self.file.artifacts.iter().find(|a| {
            a.name == name
                && a.path == path
                && (a.repository == repository || repo_eq(&a.repository, repository))
        })
    }

    /// True when absent, at a different version, or missing any client.
    pub fn needs_install(&self, key: &ArtifactKey, version: &str, clients: &[String]) -> bool {
        match self.find_artifact(key) {
            None => true,
            Some(installed) => {
                installed.version != version
                    || clients.iter().any(|c| !installed.clients.contains(c))
            }
        }
    }

    /// Entries grouped by `(repository, path)`; global installs under `("", "")`.
    pub fn group_by_scope(&self) -> BTreeMap<(String, String), Vec<&InstalledArtifact>> {
        let mut groups: BTreeMap<(String, String), Vec<&InstalledArtifact>> = BTreeMap::new();
        for artifact in &self.file.artifacts {
            groups
                .entry((artifact.repository.clone(), artifact.path.clone()))
                .or_default()
                .push(artifact);
        }
        groups
    }

    /// Entries installed for `repository` (equivalent forms match) at `path`.
    pub fn find_by_scope(&self, repository: &str, path: &str) -> Vec<&InstalledArtifact> {
        let path = normalize_scope_path(path);
        self.file
            .artifacts
            .iter()
            .filter(|a| {
                let same_repo = if repository.is_empty() || a.repository.is_empty() {
                    repository.is_empty() && a.repository.is_empty()
                } else {
                    repos_equivalent(&a.repository, repository)
                };
                same_repo && normalize_scope_path(&a.path) == path
            })
            .collect()
    }

    /// Swap in a reconciled entry list.
    pub fn replace_artifacts(&mut self, artifacts: Vec<InstalledArtifact>) {
        self.file.artifacts = artifacts;
        self.file.updated_at = Some(Utc::now());
    }

    /// Persist atomically.
    pub fn save(&self) -> Result<(), TrackerError> {
        let content = serde_json::to_vec_pretty(&self.file).map_err(|e| TrackerError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        write_atomic(&self.path, &content).map_err(|source| {
            warn!(path = %self.path.display(), error = %source, "failed to save install tracker");
            TrackerError::Write {
                path: self.path.clone(),
                source,
            }
        })?;

        info!(
            scope_key = %self.scope_key,
            artifacts = self.file.artifacts.len(),
            "saved install tracker"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn installed(name: &str, version: &str, repo: &str, path: &str) -> InstalledArtifact {
        InstalledArtifact {
            name: name.to_string(),
            version: version.to_string(),
            kind: ArtifactType::Skill,
            install_path: format!("/target/{}", name),
            clients: vec!["claude".to_string()],
            repository: repo.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_scope_key_global_and_hashed() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("global");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&global).unwrap();
        std::fs::create_dir_all(&repo).unwrap();

        assert_eq!(scope_key(&global, Some(&global)), GLOBAL_SCOPE_KEY);

        let key = scope_key(&repo, Some(&global));
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, scope_key(&repo, None));
    }

    #[test]
    fn test_upsert_replaces_same_key_only() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();

        tracker.upsert_artifact(installed("a", "1.0.0", "", ""));
        tracker.upsert_artifact(installed("a", "1.0.0", "github.com/acme/app", ""));
        tracker.upsert_artifact(installed("a", "2.0.0", "", ""));

        assert_eq!(tracker.artifacts().len(), 2);
        assert_eq!(
            tracker.find_artifact(&ArtifactKey::global("a")).unwrap().version,
            "2.0.0"
        );
        assert!(tracker.remove_artifact(&ArtifactKey::new("a", "github.com/acme/app", "")));
        assert!(!tracker.remove_artifact(&ArtifactKey::new("a", "github.com/acme/app", "")));
        assert_eq!(tracker.artifacts().len(), 1);
    }

    #[test]
    fn test_find_with_matcher_uses_equivalence() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        tracker.upsert_artifact(installed("a", "1.0.0", "git@github.com:acme/app.git", "svc"));

        assert!(tracker
            .find_artifact(&ArtifactKey::new("a", "https://github.com/acme/app", "svc"))
            .is_none());
        assert!(tracker
            .find_artifact_with_matcher("a", "https://github.com/acme/app", "svc", repos_equivalent)
            .is_some());
        assert!(tracker
            .find_artifact_with_matcher("a", "https://github.com/acme/app", "other", repos_equivalent)
            .is_none());
    }

    #[test]
    fn test_needs_install() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        tracker.upsert_artifact(installed("a", "1.0.0", "", ""));
        let key = ArtifactKey::global("a");

        let claude = vec!["claude".to_string()];
        let both = vec!["claude".to_string(), "cursor".to_string()];
        assert!(!tracker.needs_install(&key, "1.0.0", &claude));
        assert!(tracker.needs_install(&key, "1.1.0", &claude));
        assert!(tracker.needs_install(&key, "1.0.0", &both));
        assert!(tracker.needs_install(&ArtifactKey::global("b"), "1.0.0", &claude));
    }

    #[test]
    fn test_scope_views() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        tracker.upsert_artifact(installed("a", "1.0.0", "", ""));
        tracker.upsert_artifact(installed("b", "1.0.0", "https://github.com/acme/app", "svc"));
        tracker.upsert_artifact(installed("c", "1.0.0", "https://github.com/acme/app", "svc"));

        let groups = tracker.group_by_scope();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&(String::new(), String::new())].len(), 1);

        let found = tracker.find_by_scope("git@github.com:acme/app.git", "./svc/");
        assert_eq!(found.len(), 2);
        assert_eq!(tracker.find_by_scope("", "").len(), 1);
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("installed-state");
        let target = dir.path().join("project");
        std::fs::create_dir_all(&target).unwrap();

        let mut tracker = InstallTracker::open(&state, &target, None).unwrap();
        tracker.set_lock_file_version("7");
        tracker.upsert_artifact(installed("a", "1.0.0", "", ""));
        tracker.save().unwrap();

        let raw = std::fs::read_to_string(tracker.file_path()).unwrap();
        assert!(raw.contains("\"lockFileVersion\": \"7\""));
        assert!(raw.contains("\"installPath\""));
        assert!(raw.contains("\"installedAt\""));

        let reopened = InstallTracker::open(&state, &target, None).unwrap();
        assert_eq!(reopened.artifacts(), tracker.artifacts());
        assert_eq!(reopened.lock_file_version(), Some("7"));
    }

    #[test]
    fn test_corrupt_and_future_files() {
        let dir = TempDir::new().unwrap();
        let key = scope_key(dir.path(), None);
        let path = dir.path().join(format!("{}.json", key));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            InstallTracker::open(dir.path(), dir.path(), None),
            Err(TrackerError::Corrupt { .. })
        ));

        std::fs::write(
            &path,
            r#"{"version": 99, "installedAt": "2026-01-01T00:00:00Z", "artifacts": []}"#,
        )
        .unwrap();
        assert!(matches!(
            InstallTracker::open(dir.path(), dir.path(), None),
            Err(TrackerError::UnsupportedFormat { found: 99, .. })
        ));
    }
}
