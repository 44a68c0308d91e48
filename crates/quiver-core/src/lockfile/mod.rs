//! Lock file model.
//!
//! The lock file (`quiver.lock`) pins every artifact to an exact version and
//! source so installs are reproducible across machines.
//!
//! # Format (lock-version 2)
//!
//! ```toml
//! lock-version = 2
//! version = "1"
//! created-by = "quiver/0.4.0"
//!
//! [install]
//! clients = ["claude"]
//!
//! [[assets]]
//! name = "code-review"
//! version = "1.2.0"
//! type = "skill"
//!
//! [assets.http]
//! url = "https://registry.quiver.dev/v1/assets/code-review/1.2.0.zip"
//! hashes = { sha256 = "9f86d0..." }
//!
//! [[assets.dependencies]]
//! name = "style-guide"
//! version = "1.0.0"
//!
//! [[assets.scopes]]
//! repository-url = "https://github.com/acme/app"
//! paths = ["services/api"]
//! ```
//!
//! Files written by older releases (`[[artifacts]]` with
//! `[[artifacts.repositories]]`) are upgraded on load and always written back
//! in the current form.

mod schema;
mod validate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LockfileError, ValidationError, Violation};
use crate::fsutil::write_atomic;
use crate::graph::validate_dependencies;
use crate::model::{Artifact, ArtifactType, InstallConfig, Scope, Source};
use crate::version::Version;

pub use schema::{decode, encode, RawArtifact, RawLockFile, RawScope};
pub use validate::validate_document;

/// Default lock file name.
pub const LOCKFILE_NAME: &str = "quiver.lock";

/// Current lock file schema version.
pub const LOCK_VERSION: u32 = 2;

/// A parsed, validated lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockFile {
    /// Schema version.
    pub lock_version: u32,

    /// Content version, bumped by whoever edits the file.
    pub version: String,

    /// Tool that wrote the file.
    pub created_by: String,

    pub install: Option<InstallConfig>,

    pub artifacts: Vec<Artifact>,

    /// Directory of the file on disk; relative path sources resolve against it.
    pub base_dir: Option<PathBuf>,
}

impl LockFile {
    /// Create an empty lock file.
    pub fn new() -> Self {
        Self {
            lock_version: LOCK_VERSION,
            version: "1".to_string(),
            created_by: format!("quiver/{}", env!("CARGO_PKG_VERSION")),
            install: None,
            artifacts: Vec::new(),
            base_dir: None,
        }
    }

    /// Load and validate a lock file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LockfileError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LockfileError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| LockfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut lockfile = Self::parse(&content)?;
        lockfile.base_dir = path.parent().map(Path::to_path_buf);
        Ok(lockfile)
    }

    /// Parse and validate lock file content.
    pub fn parse(content: &str) -> Result<Self, LockfileError> {
        let (doc, upgraded) = decode(content)?;

        if let Some(found) = doc.lock_version {
            if found > LOCK_VERSION {
                return Err(LockfileError::UnsupportedVersion {
                    found,
                    supported: LOCK_VERSION,
                });
            }
        }

        validate_document(&doc)?;
        if upgraded {
            debug!(assets = doc.assets.len(), "upgraded legacy lock file schema");
        }

        let lockfile = Self::from_document(doc)?;
        validate_dependencies(&lockfile)?;
        Ok(lockfile)
    }

    /// Write the lock file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LockfileError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;

        write_atomic(path, content.as_bytes()).map_err(|source| LockfileError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), assets = self.artifacts.len(), "saved lock file");
        Ok(())
    }

    /// Serialize to TOML in the current schema.
    pub fn to_toml_string(&self) -> Result<String, LockfileError> {
        encode(&self.to_document())
    }

    /// Run every structural rule and the cycle check.
    pub fn validate(&self) -> Result<(), LockfileError> {
        validate_document(&self.to_document())?;
        validate_dependencies(self)?;
        Ok(())
    }

    /// Wire form of this lock file.
    pub fn to_document(&self) -> RawLockFile {
        RawLockFile {
            lock_version: Some(self.lock_version),
            version: Some(self.version.clone()),
            created_by: Some(self.created_by.clone()),
            install: self.install.clone(),
            assets: self.artifacts.iter().map(to_raw).collect(),
        }
    }

    /// Build the model from a document that already passed validation.
    pub fn from_document(doc: RawLockFile) -> Result<Self, ValidationError> {
        let artifacts = doc
            .assets
            .into_iter()
            .enumerate()
            .map(|(index, raw)| from_raw(index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            lock_version: doc.lock_version.unwrap_or(LOCK_VERSION),
            version: doc.version.unwrap_or_default(),
            created_by: doc.created_by.unwrap_or_default(),
            install: doc.install,
            artifacts,
            base_dir: None,
        })
    }

    /// Add or replace an artifact by name, keeping entries sorted.
    pub fn upsert_artifact(&mut self, artifact: Artifact) {
        self.artifacts.retain(|a| a.name != artifact.name);
        self.artifacts.push(artifact);
        self.artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Remove every entry with `name`. Returns whether anything was removed.
    pub fn remove_artifact(&mut self, name: &str) -> bool {
        let before = self.artifacts.len();
        self.artifacts.retain(|a| a.name != name);
        self.artifacts.len() != before
    }

    /// Highest-versioned entry with `name`.
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.name == name)
            .max_by(|a, b| a.version.cmp(&b.version))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.iter().any(|a| a.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.name.as_str()).collect()
    }

    /// Name → artifact map for the dependency resolver. When a name appears
    /// with several versions the highest wins.
    pub fn catalog(&self) -> HashMap<String, Artifact> {
        let mut catalog: HashMap<String, Artifact> = HashMap::new();
        for artifact in &self.artifacts {
            match catalog.get(&artifact.name) {
                Some(existing) if existing.version >= artifact.version => {}
                _ => {
                    catalog.insert(artifact.name.clone(), artifact.clone());
                }
            }
        }
        catalog
    }

    /// Directory used to resolve relative path sources.
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}

impl Default for LockFile {
    fn default() -> Self {
        Self::new()
    }
}

fn to_raw(artifact: &Artifact) -> RawArtifact {
    let mut raw = RawArtifact {
        name: artifact.name.clone(),
        version: artifact.version.to_string(),
        kind: artifact.kind.as_str().to_string(),
        clients: artifact.clients.clone(),
        dependencies: artifact.dependencies.clone(),
        scopes: artifact
            .scopes
            .iter()
            .map(|s| RawScope {
                repository_url: s.repository_url.clone(),
                paths: s.paths.clone(),
            })
            .collect(),
        ..Default::default()
    };
    match &artifact.source {
        Source::Http(spec) => raw.http = Some(spec.clone()),
        Source::Path(spec) => raw.path = Some(spec.clone()),
        Source::Git(spec) => raw.git = Some(spec.clone()),
    }
    raw
}

fn from_raw(index: usize, raw: RawArtifact) -> Result<Artifact, ValidationError> {
    let fail = |violation| ValidationError::artifact(index, &raw.name, violation);

    let version =
        Version::parse(&raw.version).map_err(|_| fail(Violation::InvalidVersion(raw.version.clone())))?;
    let kind: ArtifactType = raw
        .kind
        .parse()
        .map_err(|kind| fail(Violation::UnknownType(kind)))?;

    let source = match (raw.http.clone(), raw.path.clone(), raw.git.clone()) {
        (Some(http), None, None) => Source::Http(http),
        (None, Some(path), None) => Source::Path(path),
        (None, None, Some(git)) => Source::Git(git),
        (None, None, None) => return Err(fail(Violation::MissingSource)),
        _ => return Err(fail(Violation::MultipleSources(raw.source_kinds().join(", ")))),
    };

    Ok(Artifact {
        name: raw.name,
        version,
        kind,
        clients: raw.clients,
        dependencies: raw.dependencies,
        source,
        scopes: raw
            .scopes
            .into_iter()
            .map(|s| Scope {
                repository_url: s.repository_url,
                paths: s.paths,
            })
            .collect(),
    })
}
