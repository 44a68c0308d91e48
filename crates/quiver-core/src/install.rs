//! Installation orchestration.
//!
//! The orchestrator decides *what* to install or remove and records the
//! outcome in the [`InstallTracker`]. Writing client-specific files is the
//! job of an [`Installer`], obtained per artifact and client from an
//! [`InstallerProvider`]. Failures are collected per item; one broken
//! artifact never stops the rest.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::InstallError;
use crate::model::{Artifact, ArtifactType, FetchedArtifact};
use crate::scope::{matches_artifact, CurrentScope};
use crate::tracker::{ArtifactKey, InstallTracker, InstalledArtifact};

/// Writes and removes one artifact for one client.
pub trait Installer: Send + Sync {
    fn install(&self, archive: &[u8], target_base: &Path) -> Result<(), InstallError>;

    fn remove(&self, target_base: &Path) -> Result<(), InstallError>;

    /// `(installed, detail)`.
    fn verify_installed(&self, target_base: &Path) -> (bool, String);

    /// Where the artifact lands; recorded in the tracker.
    fn install_path(&self, target_base: &Path) -> PathBuf {
        target_base.to_path_buf()
    }
}

/// What an installer needs to know about the artifact it handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    pub name: String,
    pub version: String,
    pub kind: ArtifactType,
}

impl From<&Artifact> for ArtifactIdentity {
    fn from(artifact: &Artifact) -> Self {
        Self {
            name: artifact.name.clone(),
            version: artifact.version.to_string(),
            kind: artifact.kind,
        }
    }
}

impl From<&InstalledArtifact> for ArtifactIdentity {
    fn from(installed: &InstalledArtifact) -> Self {
        Self {
            name: installed.name.clone(),
            version: installed.version.clone(),
            kind: installed.kind,
        }
    }
}

/// Hands out installers per artifact and client.
pub trait InstallerProvider: Send + Sync {
    fn installer_for(&self, artifact: &ArtifactIdentity, client: &str) -> Option<Box<dyn Installer>>;
}

/// Outcome of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Installed { clients: Vec<String> },
    UpToDate,
    Removed,
    Skipped { reason: String },
    Failed { error: String },
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { clients } => write!(f, "installed for {}", clients.join(", ")),
            Self::UpToDate => f.write_str("up to date"),
            Self::Removed => f.write_str("removed"),
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
            Self::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallItem {
    pub name: String,
    pub version: String,
    pub status: InstallStatus,
}

/// Itemized result of an install or removal run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub items: Vec<InstallItem>,
}

impl InstallReport {
    fn push(&mut self, name: &str, version: impl Into<String>, status: InstallStatus) {
        self.items.push(InstallItem {
            name: name.to_string(),
            version: version.into(),
            status,
        });
    }

    /// Items that were installed, removed, or already current.
    pub fn succeeded(&self) -> Vec<&InstallItem> {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.status,
                    InstallStatus::Installed { .. } | InstallStatus::UpToDate | InstallStatus::Removed
                )
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<&InstallItem> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, InstallStatus::Failed { .. }))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// Whether anything was written or removed.
    pub fn changed(&self) -> bool {
        self.items.iter().any(|i| {
            matches!(
                i.status,
                InstallStatus::Installed { .. } | InstallStatus::Removed
            )
        })
    }
}

/// Drives installers over an ordered artifact list.
pub struct InstallationOrchestrator<'a> {
    provider: &'a dyn InstallerProvider,
}

impl<'a> InstallationOrchestrator<'a> {
    pub fn new(provider: &'a dyn InstallerProvider) -> Self {
        Self { provider }
    }

    /// Install `ordered` (dependencies first) into the tracker's target.
    /// `fetched` is keyed by artifact name. Artifacts out of scope or
    /// excluded by their client allow-list are skipped; dependents of a
    /// failed artifact fail without being attempted.
    pub fn install_all(
        &self,
        ordered: &[Artifact],
        fetched: &HashMap<String, FetchedArtifact>,
        scope: &CurrentScope,
        clients: &[String],
        tracker: &mut InstallTracker,
    ) -> InstallReport {
        let mut report = InstallReport::default();
        let mut broken: HashSet<String> = HashSet::new();
        let (repository, path) = scope.tracker_key_parts();
        let target = tracker.target().to_path_buf();

        for artifact in ordered {
            let version = artifact.version.to_string();

            if !matches_artifact(artifact, scope) {
                debug!(name = %artifact.name, "artifact out of scope");
                report.push(
                    &artifact.name,
                    version,
                    InstallStatus::Skipped {
                        reason: "not in current scope".to_string(),
                    },
                );
                continue;
            }

            if let Some(dep) = artifact
                .dependencies
                .iter()
                .find(|d| broken.contains(&d.name))
            {
                broken.insert(artifact.name.clone());
                report.push(
                    &artifact.name,
                    version,
                    InstallStatus::Failed {
                        error: format!("dependency '{}' failed to install", dep.name),
                    },
                );
                continue;
            }

            let wanted: Vec<String> = clients
                .iter()
                .filter(|c| artifact.supports_client(c))
                .cloned()
                .collect();
            if wanted.is_empty() {
                report.push(
                    &artifact.name,
                    version,
                    InstallStatus::Skipped {
                        reason: "no requested client supports this artifact".to_string(),
                    },
                );
                continue;
            }

            let key = ArtifactKey::new(&artifact.name, &repository, &path);
            if !tracker.needs_install(&key, &version, &wanted) {
                report.push(&artifact.name, version, InstallStatus::UpToDate);
                continue;
            }

            let Some(bundle) = fetched.get(&artifact.name) else {
                broken.insert(artifact.name.clone());
                report.push(
                    &artifact.name,
                    version,
                    InstallStatus::Failed {
                        error: "archive was not fetched".to_string(),
                    },
                );
                continue;
            };

            let identity = ArtifactIdentity::from(artifact);
            let mut installed_for = Vec::new();
            let mut install_path = target.clone();
            let mut errors = Vec::new();

            for client in &wanted {
                let result = match self.provider.installer_for(&identity, client) {
                    None => Err(InstallError::NoInstaller {
                        kind: artifact.kind.to_string(),
                        client: client.clone(),
                    }),
                    Some(installer) => installer
                        .install(&bundle.archive, &target)
                        .map(|()| installer.install_path(&target)),
                };
                match result {
                    Ok(at) => {
                        install_path = at;
                        installed_for.push(client.clone());
                    }
                    Err(e) => {
                        warn!(name = %artifact.name, client = %client, error = %e, "install failed");
                        errors.push(format!("{}: {}", client, e));
                    }
                }
            }

            if !installed_for.is_empty() {
                let mut recorded = tracker
                    .find_artifact(&key)
                    .filter(|existing| existing.version == version)
                    .map(|existing| existing.clients.clone())
                    .unwrap_or_default();
                for client in &installed_for {
                    if !recorded.contains(client) {
                        recorded.push(client.clone());
                    }
                }

                tracker.upsert_artifact(InstalledArtifact {
                    name: artifact.name.clone(),
                    version: version.clone(),
                    kind: artifact.kind,
                    install_path: install_path.to_string_lossy().into_owned(),
                    clients: recorded,
                    repository: repository.clone(),
                    path: path.clone(),
                });
            }

            if errors.is_empty() {
                info!(name = %artifact.name, version = %version, "installed artifact");
                report.push(
                    &artifact.name,
                    version,
                    InstallStatus::Installed {
                        clients: installed_for,
                    },
                );
            } else {
                broken.insert(artifact.name.clone());
                report.push(
                    &artifact.name,
                    version,
                    InstallStatus::Failed {
                        error: errors.join("; "),
                    },
                );
            }
        }

        report
    }

    /// Uninstall `removed` from every client it was recorded for and drop
    /// the tracker entries that were fully removed.
    pub fn remove_artifacts(
        &self,
        removed: &[InstalledArtifact],
        tracker: &mut InstallTracker,
    ) -> InstallReport {
        let mut report = InstallReport::default();
        let target = tracker.target().to_path_buf();

        for entry in removed {
            let identity = ArtifactIdentity::from(entry);
            let mut errors = Vec::new();

            for client in &entry.clients {
                let result = match self.provider.installer_for(&identity, client) {
                    None => Err(InstallError::NoInstaller {
                        kind: entry.kind.to_string(),
                        client: client.clone(),
                    }),
                    Some(installer) => installer.remove(&target),
                };
                if let Err(e) = result {
                    warn!(name = %entry.name, client = %client, error = %e, "remove failed");
                    errors.push(format!("{}: {}", client, e));
                }
            }

            if errors.is_empty() {
                tracker.remove_artifact(&entry.key());
                info!(name = %entry.name, version = %entry.version, "removed artifact");
                report.push(&entry.name, entry.version.clone(), InstallStatus::Removed);
            } else {
                report.push(
                    &entry.name,
                    entry.version.clone(),
                    InstallStatus::Failed {
                        error: errors.join("; "),
                    },
                );
            }
        }

        report
    }

    /// Ask each recorded client whether the entry is still in place.
    pub fn verify(&self, entry: &InstalledArtifact, target: &Path) -> Vec<(String, bool, String)> {
        let identity = ArtifactIdentity::from(entry);
        entry
            .clients
            .iter()
            .map(|client| match self.provider.installer_for(&identity, client) {
                Some(installer) => {
                    let (ok, detail) = installer.verify_installed(target);
                    (client.clone(), ok, detail)
                }
                None => (client.clone(), false, "no installer".to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{archive_entries, read_metadata, METADATA_FILE};
    use crate::model::{Dependency, PathSpec, Scope, Source};
    use crate::version::Version;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        fail: HashSet<String>,
    }

    struct RecordingInstaller {
        name: String,
        client: String,
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Installer for RecordingInstaller {
        fn install(&self, archive: &[u8], _target_base: &Path) -> Result<(), InstallError> {
            read_metadata(archive)?;
            if self.fail {
                return Err(InstallError::Failed("disk full".to_string()));
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("install {} {}", self.name, self.client));
            Ok(())
        }

        fn remove(&self, _target_base: &Path) -> Result<(), InstallError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remove {} {}", self.name, self.client));
            Ok(())
        }

        fn verify_installed(&self, _target_base: &Path) -> (bool, String) {
            (true, "ok".to_string())
        }

        fn install_path(&self, target_base: &Path) -> PathBuf {
            target_base.join(&self.client).join(&self.name)
        }
    }

    impl InstallerProvider for Recorder {
        fn installer_for(&self, artifact: &ArtifactIdentity, client: &str) -> Option<Box<dyn Installer>> {
            if client == "unknown" {
                return None;
            }
            Some(Box::new(RecordingInstaller {
                name: artifact.name.clone(),
                client: client.to_string(),
                calls: self.calls.clone(),
                fail: self.fail.contains(&artifact.name),
            }))
        }
    }

    fn artifact(name: &str) -> Artifact {
        Artifact::new(
            name,
            Version::new(1, 0, 0),
            ArtifactType::Skill,
            Source::Path(PathSpec {
                path: format!("./{}", name),
            }),
        )
    }

    fn fetched(artifacts: &[Artifact]) -> HashMap<String, FetchedArtifact> {
        artifacts
            .iter()
            .map(|a| {
                let meta = format!("name = \"{}\"\nversion = \"1.0.0\"\ntype = \"skill\"\n", a.name);
                let archive = archive_entries([(METADATA_FILE, meta.as_bytes())]).unwrap();
                let metadata = read_metadata(&archive).unwrap();
                (
                    a.name.clone(),
                    FetchedArtifact {
                        artifact: a.clone(),
                        archive,
                        metadata,
                        from_cache: false,
                    },
                )
            })
            .collect()
    }

    fn clients(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_install_records_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        let provider = Recorder::default();
        let orchestrator = InstallationOrchestrator::new(&provider);

        let ordered = vec![artifact("a"), artifact("b").with_dependency(Dependency::new("a"))];
        let bundles = fetched(&ordered);

        let report = orchestrator.install_all(
            &ordered,
            &bundles,
            &CurrentScope::Global,
            &clients(&["claude"]),
            &mut tracker,
        );
        assert!(report.is_success());
        assert!(report.changed());
        assert_eq!(tracker.artifacts().len(), 2);
        assert!(tracker
            .find_artifact(&ArtifactKey::global("a"))
            .unwrap()
            .install_path
            .ends_with("a"));

        let again = orchestrator.install_all(
            &ordered,
            &bundles,
            &CurrentScope::Global,
            &clients(&["claude"]),
            &mut tracker,
        );
        assert!(!again.changed());
        assert!(again.items.iter().all(|i| i.status == InstallStatus::UpToDate));
        assert_eq!(provider.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failure_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        let provider = Recorder {
            fail: ["a".to_string()].into(),
            ..Default::default()
        };
        let orchestrator = InstallationOrchestrator::new(&provider);

        let ordered = vec![
            artifact("a"),
            artifact("b").with_dependency(Dependency::new("a")),
            artifact("c"),
        ];
        let report = orchestrator.install_all(
            &ordered,
            &fetched(&ordered),
            &CurrentScope::Global,
            &clients(&["claude"]),
            &mut tracker,
        );

        assert!(!report.is_success());
        assert_eq!(report.failed().len(), 2);
        assert_eq!(report.succeeded().len(), 1);
        assert_eq!(report.succeeded()[0].name, "c");
        assert_eq!(tracker.artifacts().len(), 1);
    }

    #[test]
    fn test_scope_and_client_filtering() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        let provider = Recorder::default();
        let orchestrator = InstallationOrchestrator::new(&provider);

        let ordered = vec![
            artifact("scoped").with_scope(Scope::repository("https://github.com/acme/other")),
            artifact("cursor-only").with_clients(&["cursor"]),
            artifact("mine"),
        ];
        let scope = CurrentScope::repo("https://github.com/acme/app");
        let report = orchestrator.install_all(
            &ordered,
            &fetched(&ordered),
            &scope,
            &clients(&["claude"]),
            &mut tracker,
        );

        let statuses: Vec<&InstallStatus> = report.items.iter().map(|i| &i.status).collect();
        assert!(matches!(statuses[0], InstallStatus::Skipped { .. }));
        assert!(matches!(statuses[1], InstallStatus::Skipped { .. }));
        assert!(matches!(statuses[2], InstallStatus::Installed { .. }));

        let entry = &tracker.artifacts()[0];
        assert_eq!(entry.repository, "https://github.com/acme/app");
    }

    #[test]
    fn test_missing_installer_and_archive() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        let provider = Recorder::default();
        let orchestrator = InstallationOrchestrator::new(&provider);

        let ordered = vec![artifact("a"), artifact("b")];
        let mut bundles = fetched(&ordered);
        bundles.remove("b");

        let report = orchestrator.install_all(
            &ordered,
            &bundles,
            &CurrentScope::Global,
            &clients(&["claude", "unknown"]),
            &mut tracker,
        );
        assert!(matches!(&report.items[0].status, InstallStatus::Failed { error } if error.contains("unknown")));
        assert!(matches!(&report.items[1].status, InstallStatus::Failed { error } if error.contains("not fetched")));
        // The client that worked is still recorded.
        assert_eq!(
            tracker.find_artifact(&ArtifactKey::global("a")).unwrap().clients,
            vec!["claude".to_string()]
        );
    }

    #[test]
    fn test_remove_artifacts() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        let provider = Recorder::default();
        let orchestrator = InstallationOrchestrator::new(&provider);

        let ordered = vec![artifact("a")];
        orchestrator.install_all(
            &ordered,
            &fetched(&ordered),
            &CurrentScope::Global,
            &clients(&["claude", "cursor"]),
            &mut tracker,
        );

        let entry = tracker.artifacts()[0].clone();
        let checks = orchestrator.verify(&entry, dir.path());
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|(_, ok, _)| *ok));

        let report = orchestrator.remove_artifacts(&[entry], &mut tracker);
        assert!(report.is_success());
        assert!(tracker.artifacts().is_empty());
        let calls = provider.calls.lock().unwrap();
        assert!(calls.contains(&"remove a cursor".to_string()));
    }
}
