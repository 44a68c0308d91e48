//! Wire schema of the lock file.
//!
//! Decoding is versioned: the current schema (`[[assets]]` with
//! `[[assets.scopes]]`) is tried first; if it yields no assets, the legacy
//! schema (`[[artifacts]]` with `[[artifacts.repositories]]`) is tried and
//! mapped onto the current one. Callers only ever see [`RawLockFile`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LockfileError;
use crate::model::{Dependency, GitSpec, HttpSpec, InstallConfig, PathSpec};

/// Scope entry as written in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawScope {
    #[serde(default)]
    pub repository_url: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Artifact entry as written in the file. Everything optional so the
/// validator, not the decoder, reports what is wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawArtifact {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<RawScope>,
}

/// Current lock file schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawLockFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_version: Option<u32>,

    /// Content version of the lock file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallConfig>,

    #[serde(default)]
    pub assets: Vec<RawArtifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LegacyScope {
    #[serde(default)]
    url: String,

    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LegacyArtifact {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    clients: Vec<String>,
    #[serde(default)]
    http: Option<HttpSpec>,
    #[serde(default)]
    path: Option<PathSpec>,
    #[serde(default)]
    git: Option<GitSpec>,
    #[serde(default)]
    dependencies: Vec<Dependency>,
    #[serde(default)]
    repositories: Vec<LegacyScope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LegacyLockFile {
    #[serde(default)]
    lock_version: Option<u32>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    install: Option<InstallConfig>,
    #[serde(default)]
    artifacts: Vec<LegacyArtifact>,
}

impl From<LegacyArtifact> for RawArtifact {
    fn from(legacy: LegacyArtifact) -> Self {
        Self {
            name: legacy.name,
            version: legacy.version,
            kind: legacy.kind,
            clients: legacy.clients,
            http: legacy.http,
            path: legacy.path,
            git: legacy.git,
            dependencies: legacy.dependencies,
            scopes: legacy
                .repositories
                .into_iter()
                .map(|r| RawScope {
                    repository_url: r.url,
                    paths: r.paths,
                })
                .collect(),
        }
    }
}

impl From<LegacyLockFile> for RawLockFile {
    fn from(legacy: LegacyLockFile) -> Self {
        Self {
            lock_version: legacy.lock_version,
            version: legacy.version,
            created_by: legacy.created_by,
            install: legacy.install,
            assets: legacy.artifacts.into_iter().map(RawArtifact::from).collect(),
        }
    }
}

impl RawArtifact {
    /// Names of the source tables that are set, in file order.
    pub fn source_kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.http.is_some() {
            kinds.push("http");
        }
        if self.path.is_some() {
            kinds.push("path");
        }
        if self.git.is_some() {
            kinds.push("git");
        }
        kinds
    }

    /// Hashes declared on the http source, if any.
    pub fn hashes(&self) -> Option<&BTreeMap<String, String>> {
        self.http.as_ref().map(|h| &h.hashes)
    }
}

/// Decode TOML into the current schema, upgrading a legacy document.
pub fn decode(content: &str) -> Result<(RawLockFile, bool), LockfileError> {
    let current: RawLockFile =
        toml::from_str(content).map_err(|e| LockfileError::Parse(e.to_string()))?;
    if !current.assets.is_empty() {
        return Ok((current, false));
    }

    let legacy: LegacyLockFile =
        toml::from_str(content).map_err(|e| LockfileError::Parse(e.to_string()))?;
    if legacy.artifacts.is_empty() {
        return Ok((current, false));
    }

    Ok((RawLockFile::from(legacy), true))
}

/// Encode to TOML (always the current schema).
pub fn encode(raw: &RawLockFile) -> Result<String, LockfileError> {
    toml::to_string_pretty(raw).map_err(|e| LockfileError::Serialize(e.to_string()))
}
