//! Structural validation of a decoded lock file.
//!
//! Rules run in a fixed order and the first failure aborts. Every artifact
//! error names the offending index and artifact.

use std::collections::{HashMap, HashSet};

use crate::error::{ValidationError, Violation};
use crate::model::{is_commit_id, is_valid_name, ArtifactType, SUPPORTED_HASHES};
use crate::version::Version;

use super::schema::{RawArtifact, RawLockFile};

/// Validate a decoded document.
pub fn validate_document(doc: &RawLockFile) -> Result<(), ValidationError> {
    if doc.lock_version.is_none() {
        return Err(ValidationError::MissingField {
            field: "lock-version",
        });
    }
    if doc.version.as_deref().map_or(true, |v| v.trim().is_empty()) {
        return Err(ValidationError::MissingField { field: "version" });
    }
    if doc
        .created_by
        .as_deref()
        .map_or(true, |v| v.trim().is_empty())
    {
        return Err(ValidationError::MissingField {
            field: "created-by",
        });
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut available: HashMap<&str, Vec<Version>> = HashMap::new();

    for (index, artifact) in doc.assets.iter().enumerate() {
        let fail = |violation| ValidationError::artifact(index, &artifact.name, violation);

        let version = check_artifact(artifact).map_err(fail)?;

        if !seen.insert((artifact.name.as_str(), artifact.version.as_str())) {
            return Err(fail(Violation::Duplicate {
                name: artifact.name.clone(),
                version: artifact.version.clone(),
            }));
        }

        available
            .entry(artifact.name.as_str())
            .or_default()
            .push(version);
    }

    for (index, artifact) in doc.assets.iter().enumerate() {
        check_dependencies(artifact, &available)
            .map_err(|violation| ValidationError::artifact(index, &artifact.name, violation))?;
    }

    Ok(())
}

fn check_artifact(artifact: &RawArtifact) -> Result<Version, Violation> {
    if !is_valid_name(&artifact.name) {
        return Err(Violation::InvalidName);
    }

    let version = Version::parse(&artifact.version)
        .map_err(|_| Violation::InvalidVersion(artifact.version.clone()))?;

    if artifact.kind.parse::<ArtifactType>().is_err() {
        return Err(Violation::UnknownType(artifact.kind.clone()));
    }

    let kinds = artifact.source_kinds();
    match kinds.len() {
        0 => return Err(Violation::MissingSource),
        1 => {}
        _ => return Err(Violation::MultipleSources(kinds.join(", "))),
    }

    if let Some(http) = &artifact.http {
        if http.url.trim().is_empty() {
            return Err(Violation::EmptyUrl);
        }
        check_hashes(http.hashes.iter())?;
    }

    if let Some(git) = &artifact.git {
        if git.url.trim().is_empty() {
            return Err(Violation::EmptyGitUrl);
        }
        if !is_commit_id(&git.reference) {
            return Err(Violation::UnpinnedGitRef(git.reference.clone()));
        }
    }

    if let Some(path) = &artifact.path {
        if path.path.trim().is_empty() {
            return Err(Violation::EmptyPath);
        }
    }

    for (i, scope) in artifact.scopes.iter().enumerate() {
        if scope.repository_url.trim().is_empty() {
            return Err(Violation::EmptyScopeRepository(i));
        }
    }

    Ok(version)
}

fn check_hashes<'a>(
    hashes: impl Iterator<Item = (&'a String, &'a String)>,
) -> Result<(), Violation> {
    let mut supported = 0;
    for (algorithm, digest) in hashes {
        let algorithm = algorithm.to_ascii_lowercase();
        if !SUPPORTED_HASHES.contains(&algorithm.as_str()) {
            return Err(Violation::UnsupportedHashAlgorithm(algorithm));
        }
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Violation::MalformedHash { algorithm });
        }
        supported += 1;
    }
    if supported == 0 {
        return Err(Violation::MissingHash);
    }
    Ok(())
}

fn check_dependencies(
    artifact: &RawArtifact,
    available: &HashMap<&str, Vec<Version>>,
) -> Result<(), Violation> {
    for dep in &artifact.dependencies {
        if dep.name == artifact.name {
            return Err(Violation::SelfDependency);
        }

        let Some(versions) = available.get(dep.name.as_str()) else {
            return Err(Violation::MissingDependency(dep.name.clone()));
        };

        if let Some(required) = &dep.version {
            let matches = Version::parse(required)
                .map(|req| versions.iter().any(|v| *v == req))
                .unwrap_or(false);
            if !matches {
                let listed: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
                return Err(Violation::DependencyVersionMismatch {
                    name: dep.name.clone(),
                    required: required.clone(),
                    available: listed.join(", "),
                });
            }
        }
    }
    Ok(())
}
