//! Domain types shared by every stage of the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::archive::ArtifactMetadata;
use crate::version::Version;

/// Hash algorithms accepted on HTTP sources.
pub const SUPPORTED_HASHES: [&str; 2] = ["sha256", "sha512"];

/// Kind of artifact. Decides which installer handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    Skill,
    Agent,
    Command,
    Rule,
    Mcp,
    McpRemote,
    Hook,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 7] = [
        Self::Skill,
        Self::Agent,
        Self::Command,
        Self::Rule,
        Self::Mcp,
        Self::McpRemote,
        Self::Hook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Command => "command",
            Self::Rule => "rule",
            Self::Mcp => "mcp",
            Self::McpRemote => "mcp-remote",
            Self::Hook => "hook",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

/// HTTP download location with integrity data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSpec {
    pub url: String,

    /// Algorithm name → lowercase hex digest.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Local path; absolute, `~/`-relative, or relative to the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSpec {
    pub path: String,
}

/// Git location pinned to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSpec {
    pub url: String,

    #[serde(rename = "ref")]
    pub reference: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
}

/// Where an artifact's archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Http(HttpSpec),
    Path(PathSpec),
    Git(GitSpec),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Path(_) => "path",
            Self::Git(_) => "git",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(h) => write!(f, "http:{}", h.url),
            Self::Path(p) => write!(f, "path:{}", p.path),
            Self::Git(g) => match &g.subdirectory {
                Some(sub) => write!(f, "git:{}@{}#{}", g.url, g.reference, sub),
                None => write!(f, "git:{}@{}", g.url, g.reference),
            },
        }
    }
}

/// Repository (and optionally sub-paths) an artifact is installed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scope {
    pub repository_url: String,

    /// Empty means the whole repository.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Scope {
    pub fn repository(url: impl Into<String>) -> Self {
        Self {
            repository_url: url.into(),
            paths: Vec::new(),
        }
    }

    pub fn with_paths(url: impl Into<String>, paths: &[&str]) -> Self {
        Self {
            repository_url: url.into(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Derived installation scope; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeType {
    Global,
    Repo,
    Path,
}

/// A dependency reference. In a lock file the version must match exactly;
/// in archive metadata it is a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }
}

/// Optional `[install]` block of a lock file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstallConfig {
    #[serde(default)]
    pub clients: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
}

/// A resolved, versioned artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub version: Version,
    pub kind: ArtifactType,

    /// Client allow-list; empty means every client.
    pub clients: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub source: Source,
    pub scopes: Vec<Scope>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, version: Version, kind: ArtifactType, source: Source) -> Self {
        Self {
            name: name.into(),
            version,
            kind,
            clients: Vec::new(),
            dependencies: Vec::new(),
            source,
            scopes: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn with_clients(mut self, clients: &[&str]) -> Self {
        self.clients = clients.iter().map(|c| c.to_string()).collect();
        self
    }

    /// `name@version`.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn scope_type(&self) -> ScopeType {
        if self.scopes.is_empty() {
            ScopeType::Global
        } else if self.scopes.iter().all(|s| s.paths.is_empty()) {
            ScopeType::Repo
        } else {
            ScopeType::Path
        }
    }

    /// Whether `client` is on the allow-list.
    pub fn supports_client(&self, client: &str) -> bool {
        self.clients.is_empty() || self.clients.iter().any(|c| c == client)
    }
}

/// Result of fetching one artifact: the archive plus its descriptor.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub artifact: Artifact,
    pub archive: Vec<u8>,
    pub metadata: ArtifactMetadata,

    /// True when served from the disk or memory cache.
    pub from_cache: bool,
}

/// Whether `name` matches `[A-Za-z0-9_-]+`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Whether `reference` is a full 40-character lowercase commit id.
pub fn is_commit_id(reference: &str) -> bool {
    reference.len() == 40
        && reference
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
