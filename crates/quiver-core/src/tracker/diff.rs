//! Set differences between the tracker snapshot and the desired lock file.

use std::collections::HashSet;

use crate::model::Artifact;

use super::InstalledArtifact;

/// Installed entries whose name no longer appears in the lock file.
pub fn find_removed_artifacts(
    installed: &[InstalledArtifact],
    desired: &[Artifact],
) -> Vec<InstalledArtifact> {
    let wanted: HashSet<&str> = desired.iter().map(|a| a.name.as_str()).collect();
    installed
        .iter()
        .filter(|i| !wanted.contains(i.name.as_str()))
        .cloned()
        .collect()
}

/// Lock file artifacts not installed at all, or installed at another version.
pub fn find_changed_or_new_artifacts(
    installed: &[InstalledArtifact],
    desired: &[Artifact],
) -> Vec<Artifact> {
    desired
        .iter()
        .filter(|a| matching_install(installed, a).is_none())
        .cloned()
        .collect()
}

/// Changed or new artifacts, plus unchanged ones that are missing one of
/// `clients` they support.
pub fn find_artifacts_to_install_for_clients(
    installed: &[InstalledArtifact],
    desired: &[Artifact],
    clients: &[String],
) -> Vec<Artifact> {
    desired
        .iter()
        .filter(|a| match matching_install(installed, a) {
            None => true,
            Some(existing) => clients
                .iter()
                .filter(|c| a.supports_client(c))
                .any(|c| !existing.clients.contains(c)),
        })
        .cloned()
        .collect()
}

fn matching_install<'a>(
    installed: &'a [InstalledArtifact],
    artifact: &Artifact,
) -> Option<&'a InstalledArtifact> {
    let version = artifact.version.to_string();
    installed
        .iter()
        .find(|i| i.name == artifact.name && i.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactType, PathSpec, Source};
    use crate::tracker::tests::installed;
    use crate::version::Version;

    fn desired(name: &str, version: &str) -> Artifact {
        Artifact::new(
            name,
            Version::parse(version).unwrap(),
            ArtifactType::Skill,
            Source::Path(PathSpec {
                path: format!("./{}", name),
            }),
        )
    }

    #[test]
    fn test_removed() {
        let snapshot = vec![installed("a", "1.0.0", "", ""), installed("gone", "1.0.0", "", "")];
        let removed = find_removed_artifacts(&snapshot, &[desired("a", "1.0.0")]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "gone");
    }

    #[test]
    fn test_changed_or_new() {
        let snapshot = vec![installed("a", "1.0.0", "", ""), installed("b", "1.0.0", "", "")];
        let changed = find_changed_or_new_artifacts(
            &snapshot,
            &[desired("a", "1.0.0"), desired("b", "1.1.0"), desired("c", "0.1.0")],
        );
        let names: Vec<&str> = changed.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_missing_client_triggers_install() {
        let snapshot = vec![installed("a", "1.0.0", "", ""), installed("b", "1.0.0", "", "")];
        let clients = vec!["claude".to_string(), "cursor".to_string()];
        let restricted = desired("b", "1.0.0").with_clients(&["claude"]);

        let todo =
            find_artifacts_to_install_for_clients(&snapshot, &[desired("a", "1.0.0"), restricted], &clients);
        let names: Vec<&str> = todo.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }
}
