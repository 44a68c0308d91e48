//! Tracker vs. filesystem reconciliation.
//!
//! The filesystem side comes from [`InstalledScanner`] implementations, one
//! per client, supplied by the caller. Entries are partitioned by artifact
//! name into four disjoint sets covering the union of both sides.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::TrackerError;

use super::{InstallTracker, InstalledArtifact};

/// Reports what a client has on disk under a target directory.
pub trait InstalledScanner {
    fn scan_installed(&self, target: &Path) -> Result<Vec<InstalledArtifact>, TrackerError>;
}

/// Same name tracked and on disk, at different versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    pub name: String,
    pub tracked: Vec<InstalledArtifact>,
    pub observed: InstalledArtifact,
}

/// Partition of tracker and filesystem entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Tracked, nothing on disk.
    pub tracker_only: Vec<InstalledArtifact>,
    /// On disk, not tracked.
    pub filesystem_only: Vec<InstalledArtifact>,
    pub version_mismatch: Vec<VersionMismatch>,
    /// Tracked and on disk at the same version (tracker entries).
    pub consistent: Vec<InstalledArtifact>,
}

impl ReconcileResult {
    /// Whether tracker and filesystem agree completely.
    pub fn is_clean(&self) -> bool {
        self.tracker_only.is_empty()
            && self.filesystem_only.is_empty()
            && self.version_mismatch.is_empty()
    }
}

/// Scan the tracker's target with every scanner and partition the result.
pub fn validate_installed_state(
    tracker: &InstallTracker,
    scanners: &[&dyn InstalledScanner],
) -> Result<ReconcileResult, TrackerError> {
    let mut observed: BTreeMap<String, InstalledArtifact> = BTreeMap::new();
    for scanner in scanners {
        for found in scanner.scan_installed(tracker.target())? {
            match observed.get_mut(&found.name) {
                None => {
                    observed.insert(found.name.clone(), found);
                }
                Some(existing) if existing.version == found.version => {
                    for client in found.clients {
                        if !existing.clients.contains(&client) {
                            existing.clients.push(client);
                        }
                    }
                }
                Some(existing) => {
                    warn!(
                        name = %found.name,
                        first = %existing.version,
                        other = %found.version,
                        "clients report different installed versions"
                    );
                }
            }
        }
    }

    let result = partition(tracker.artifacts(), observed);
    debug!(
        tracker_only = result.tracker_only.len(),
        filesystem_only = result.filesystem_only.len(),
        version_mismatch = result.version_mismatch.len(),
        consistent = result.consistent.len(),
        "reconciled install state"
    );
    Ok(result)
}

pub(crate) fn partition(
    tracked: &[InstalledArtifact],
    mut observed: BTreeMap<String, InstalledArtifact>,
) -> ReconcileResult {
    let mut by_name: BTreeMap<String, Vec<InstalledArtifact>> = BTreeMap::new();
    for entry in tracked {
        by_name.entry(entry.name.clone()).or_default().push(entry.clone());
    }

    let mut result = ReconcileResult::default();
    for (name, entries) in by_name {
        match observed.remove(&name) {
            None => result.tracker_only.extend(entries),
            Some(found) if entries.iter().all(|e| e.version == found.version) => {
                result.consistent.extend(entries)
            }
            Some(found) => result.version_mismatch.push(VersionMismatch {
                name,
                tracked: entries,
                observed: found,
            }),
        }
    }
    result.filesystem_only.extend(observed.into_values());
    result
}

/// Entry list to write back. Consistent entries always survive. With
/// `prefer_tracker` stale tracker entries and tracked versions are kept;
/// otherwise the filesystem wins: untracked installs are adopted and
/// mismatches take the observed version and install path.
pub fn reconcile(result: &ReconcileResult, prefer_tracker: bool) -> Vec<InstalledArtifact> {
    let mut out = result.consistent.clone();

    if prefer_tracker {
        out.extend(result.tracker_only.iter().cloned());
        for mismatch in &result.version_mismatch {
            out.extend(mismatch.tracked.iter().cloned());
        }
    } else {
        out.extend(result.filesystem_only.iter().cloned());
        for mismatch in &result.version_mismatch {
            out.extend(mismatch.tracked.iter().map(|t| InstalledArtifact {
                version: mismatch.observed.version.clone(),
                install_path: mismatch.observed.install_path.clone(),
                ..t.clone()
            }));
        }
    }

    out.sort_by(|a, b| a.key().cmp(&b.key()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::tests::installed;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct FixedScanner(Vec<InstalledArtifact>);

    impl InstalledScanner for FixedScanner {
        fn scan_installed(&self, _target: &Path) -> Result<Vec<InstalledArtifact>, TrackerError> {
            Ok(self.0.clone())
        }
    }

    fn setup() -> (TempDir, InstallTracker) {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        tracker.upsert_artifact(installed("same", "1.0.0", "", ""));
        tracker.upsert_artifact(installed("stale", "1.0.0", "", ""));
        tracker.upsert_artifact(installed("drift", "1.0.0", "", ""));
        (dir, tracker)
    }

    fn scanner() -> FixedScanner {
        let mut drift = installed("drift", "1.1.0", "", "");
        drift.install_path = "/elsewhere/drift".to_string();
        FixedScanner(vec![
            installed("same", "1.0.0", "", ""),
            drift,
            installed("manual", "0.3.0", "", ""),
        ])
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let (_dir, tracker) = setup();
        let scanner = scanner();
        let result = validate_installed_state(&tracker, &[&scanner]).unwrap();

        let mut seen = HashSet::new();
        let names = result
            .tracker_only
            .iter()
            .chain(&result.filesystem_only)
            .chain(&result.consistent)
            .map(|a| a.name.clone())
            .chain(result.version_mismatch.iter().map(|m| m.name.clone()));
        for name in names {
            assert!(seen.insert(name.clone()), "{} in two partitions", name);
        }

        let union: HashSet<String> = ["same", "stale", "drift", "manual"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(seen, union);
        assert_eq!(result.tracker_only[0].name, "stale");
        assert_eq!(result.filesystem_only[0].name, "manual");
        assert_eq!(result.version_mismatch[0].observed.version, "1.1.0");
        assert!(!result.is_clean());
    }

    #[test]
    fn test_reconcile_prefer_tracker() {
        let (_dir, tracker) = setup();
        let scanner = scanner();
        let result = validate_installed_state(&tracker, &[&scanner]).unwrap();

        let kept = reconcile(&result, true);
        let summary: Vec<(&str, &str)> =
            kept.iter().map(|a| (a.name.as_str(), a.version.as_str())).collect();
        assert_eq!(
            summary,
            vec![("drift", "1.0.0"), ("same", "1.0.0"), ("stale", "1.0.0")]
        );
    }

    #[test]
    fn test_reconcile_prefer_filesystem() {
        let (_dir, mut tracker) = setup();
        let scanner = scanner();
        let result = validate_installed_state(&tracker, &[&scanner]).unwrap();

        let kept = reconcile(&result, false);
        let summary: Vec<(&str, &str)> =
            kept.iter().map(|a| (a.name.as_str(), a.version.as_str())).collect();
        assert_eq!(
            summary,
            vec![("drift", "1.1.0"), ("manual", "0.3.0"), ("same", "1.0.0")]
        );
        assert_eq!(kept[0].install_path, "/elsewhere/drift");

        tracker.replace_artifacts(kept);
        let again = validate_installed_state(&tracker, &[&scanner]).unwrap();
        assert!(again.is_clean());
    }

    #[test]
    fn test_scanners_merge_clients() {
        let dir = TempDir::new().unwrap();
        let mut tracker = InstallTracker::open(dir.path(), dir.path(), None).unwrap();
        let mut both = installed("a", "1.0.0", "", "");
        both.clients = vec!["claude".to_string(), "cursor".to_string()];
        tracker.upsert_artifact(both);

        let mut on_cursor = installed("a", "1.0.0", "", "");
        on_cursor.clients = vec!["cursor".to_string()];
        let first = FixedScanner(vec![installed("a", "1.0.0", "", "")]);
        let second = FixedScanner(vec![on_cursor]);

        let result = validate_installed_state(&tracker, &[&first, &second]).unwrap();
        assert_eq!(result.consistent.len(), 1);
        assert!(result.is_clean());
    }
}
