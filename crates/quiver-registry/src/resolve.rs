//! Requirements → lock file.
//!
//! Registry names are resolved to the highest published version satisfying
//! every constraint seen for them, including constraints from dependencies.
//! Git, http and path requirements are pinned from the archive they point at.
//! The first name to be resolved wins: a later constraint that the chosen
//! version does not satisfy is an error, not a backtrack.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;

use tracing::{debug, info};

use quiver_core::archive::{is_valid_archive, read_metadata, ArtifactMetadata};
use quiver_core::model::{Artifact, Dependency, GitSpec, HttpSpec, PathSpec, Source};
use quiver_core::{CoreError, LockFile, Requirement, Version, VersionConstraint};

use crate::client::RegistryClient;
use crate::digest::sha256_hex;
use crate::error::{FetchError, FetchResult};
use crate::sources::{GitSource, PathSource};

/// A registry name still to resolve, and who asked for it.
struct Pending {
    name: String,
    constraint: VersionConstraint,
    requested_by: Option<String>,
}

/// Resolves requirements against the registry and direct sources.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: RegistryClient,
    git: GitSource,
    path: PathSource,
}

impl Resolver {
    /// `base_dir` anchors relative path requirements.
    pub fn new(client: RegistryClient, git: GitSource, base_dir: Option<PathBuf>) -> Self {
        Self {
            client,
            git,
            path: PathSource::new(base_dir),
        }
    }

    /// Build a validated lock file for `requirements`.
    pub async fn resolve(&self, requirements: &[Requirement]) -> FetchResult<LockFile> {
        let mut resolved: HashMap<String, Artifact> = HashMap::new();
        let mut queue: VecDeque<Pending> = VecDeque::new();

        // Direct registry constraints go first so they decide the version.
        for requirement in requirements {
            if let Requirement::Registry { name, constraint } = requirement {
                queue.push_back(Pending {
                    name: name.clone(),
                    constraint: constraint.clone(),
                    requested_by: None,
                });
            }
        }

        for requirement in requirements {
            let artifact = match requirement {
                Requirement::Registry { .. } => continue,
                Requirement::Git {
                    url,
                    reference,
                    name,
                    subdirectory,
                } => {
                    self.resolve_git(url, reference, name, subdirectory.as_deref())
                        .await?
                }
                Requirement::Http { url } => self.resolve_http(requirement, url).await?,
                Requirement::Path { path } => self.resolve_path(requirement, path).await?,
            };

            if let Some(existing) = resolved.get(&artifact.name) {
                return Err(FetchError::Resolution {
                    name: artifact.name.clone(),
                    message: format!(
                        "required twice ({} and {})",
                        existing.source, artifact.source
                    ),
                });
            }
            enqueue_dependencies(&mut queue, &artifact)?;
            resolved.insert(artifact.name.clone(), artifact);
        }

        while let Some(pending) = queue.pop_front() {
            if let Some(existing) = resolved.get(&pending.name) {
                if !pending.constraint.matches(&existing.version) {
                    return Err(FetchError::Resolution {
                        name: pending.name,
                        message: format!(
                            "{} was selected but {} requires '{}'",
                            existing.version,
                            pending.requested_by.as_deref().unwrap_or("the requirements"),
                            pending.constraint
                        ),
                    });
                }
                continue;
            }

            let artifact = self.resolve_registry(&pending).await?;
            enqueue_dependencies(&mut queue, &artifact)?;
            resolved.insert(artifact.name.clone(), artifact);
        }

        let mut lock = LockFile::new();
        for mut artifact in resolved.values().cloned() {
            artifact.dependencies = artifact
                .dependencies
                .iter()
                .map(|d| match resolved.get(&d.name) {
                    Some(target) => Dependency::pinned(&d.name, target.version.to_string()),
                    None => d.clone(),
                })
                .collect();
            lock.upsert_artifact(artifact);
        }

        lock.validate().map_err(CoreError::from)?;
        info!(artifacts = lock.artifacts.len(), "resolved requirements");
        Ok(lock)
    }

    async fn resolve_registry(&self, pending: &Pending) -> FetchResult<Artifact> {
        let versions = self.client.list_versions(&pending.name).await?;
        let version = pending
            .constraint
            .select_best_matching(&versions)
            .map_err(|e| FetchError::Resolution {
                name: pending.name.clone(),
                message: format!("no version matches '{}': {}", pending.constraint, e),
            })?;

        let asset = self.client.asset_info(&pending.name, &version).await?;
        info!(
            name = %pending.name,
            version = %version,
            constraint = %pending.constraint,
            requested_by = pending.requested_by.as_deref().unwrap_or("-"),
            "selected version"
        );

        let mut artifact = Artifact::new(
            asset.name,
            parse_version(&pending.name, &asset.version)?,
            asset.kind,
            Source::Http(HttpSpec {
                url: asset.download_url,
                hashes: asset.hashes,
                size: asset.size,
            }),
        );
        artifact.clients = asset.clients;
        artifact.dependencies = asset.dependencies;
        Ok(artifact)
    }

    async fn resolve_git(
        &self,
        url: &str,
        reference: &str,
        name: &str,
        subdirectory: Option<&str>,
    ) -> FetchResult<Artifact> {
        let commit = self.git.resolve_ref(url, reference).await?;
        let archive = self.git.fetch_at(name, url, &commit, subdirectory).await?;
        let metadata = read_metadata(&archive).map_err(CoreError::from)?;
        if metadata.name != name {
            return Err(FetchError::integrity(
                name,
                format!("archive metadata names '{}'", metadata.name),
            ));
        }
        debug!(name, url, reference, commit = %commit, "pinned git requirement");

        from_metadata(
            metadata,
            Source::Git(GitSpec {
                url: url.to_string(),
                reference: commit,
                subdirectory: subdirectory.map(String::from),
            }),
        )
    }

    async fn resolve_http(&self, requirement: &Requirement, url: &str) -> FetchResult<Artifact> {
        let label = requirement.name().unwrap_or_else(|| url.to_string());
        let archive = self.client.download(url).await?;
        if !is_valid_archive(&archive) {
            return Err(FetchError::integrity(&label, "payload is not a zip archive"));
        }
        let metadata = read_metadata(&archive).map_err(CoreError::from)?;

        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), sha256_hex(&archive));
        debug!(name = %metadata.name, url, "pinned http requirement");

        from_metadata(
            metadata,
            Source::Http(HttpSpec {
                url: url.to_string(),
                hashes,
                size: Some(archive.len() as u64),
            }),
        )
    }

    async fn resolve_path(&self, requirement: &Requirement, raw: &str) -> FetchResult<Artifact> {
        let label = requirement.name().unwrap_or_else(|| raw.to_string());
        let archive = self.path.read_archive(&label, &self.path.resolve(raw)).await?;
        let metadata = read_metadata(&archive).map_err(CoreError::from)?;

        from_metadata(
            metadata,
            Source::Path(PathSpec {
                path: raw.to_string(),
            }),
        )
    }
}

fn enqueue_dependencies(queue: &mut VecDeque<Pending>, artifact: &Artifact) -> FetchResult<()> {
    for dependency in &artifact.dependencies {
        let constraint = match dependency.version.as_deref() {
            Some(raw) => VersionConstraint::parse(raw).map_err(|e| FetchError::Resolution {
                name: artifact.name.clone(),
                message: format!("dependency {}: {}", dependency.name, e),
            })?,
            None => VersionConstraint::any(),
        };
        queue.push_back(Pending {
            name: dependency.name.clone(),
            constraint,
            requested_by: Some(artifact.id()),
        });
    }
    Ok(())
}

fn parse_version(name: &str, raw: &str) -> FetchResult<Version> {
    Version::parse(raw).map_err(|e| FetchError::Resolution {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn from_metadata(metadata: ArtifactMetadata, source: Source) -> FetchResult<Artifact> {
    let version = parse_version(&metadata.name, &metadata.version)?;
    let mut artifact = Artifact::new(metadata.name, version, metadata.kind, source);
    artifact.clients = metadata.clients;
    artifact.dependencies = metadata.dependencies;
    Ok(artifact)
}
