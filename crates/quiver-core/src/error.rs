//! Error types for the core engine.
//!
//! Resolution-type failures (versions, validation, graph) are fatal to the
//! operation that raised them. Install-type failures are collected per item
//! by the orchestrator instead of being returned here.

use std::path::PathBuf;

/// Version parsing and selection errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Input is not a `MAJOR[.MINOR[.PATCH]][-PRE][+BUILD]` string.
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    /// Input is not an `OPERATOR VERSION` specifier.
    #[error("invalid version specifier '{input}': {reason}")]
    InvalidSpecifier { input: String, reason: String },

    /// Candidate list was empty.
    #[error("no versions available")]
    NoVersionsAvailable,

    /// None of the candidates parsed.
    #[error("no valid versions among {count} candidates")]
    NoValidVersions { count: usize },
}

/// A single lock file rule violation, attached to an artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("name must match [A-Za-z0-9_-]+")]
    InvalidName,

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("unknown artifact type '{0}'")]
    UnknownType(String),

    #[error("no source set (expected exactly one of http, path, git)")]
    MissingSource,

    #[error("multiple sources set: {0} (expected exactly one)")]
    MultipleSources(String),

    #[error("http source has an empty url")]
    EmptyUrl,

    #[error("http source requires at least one sha256 or sha512 hash")]
    MissingHash,

    #[error("unsupported hash algorithm '{0}'")]
    UnsupportedHashAlgorithm(String),

    #[error("{algorithm} hash is not a hex digest")]
    MalformedHash { algorithm: String },

    #[error("git source has an empty url")]
    EmptyGitUrl,

    #[error("git ref '{0}' is not a full 40-character lowercase commit id")]
    UnpinnedGitRef(String),

    #[error("path source has an empty path")]
    EmptyPath,

    #[error("scope #{0} has an empty repository url")]
    EmptyScopeRepository(usize),

    #[error("duplicate artifact {name}@{version}")]
    Duplicate { name: String, version: String },

    #[error("artifact depends on itself")]
    SelfDependency,

    #[error("dependency '{0}' is not in the lock file")]
    MissingDependency(String),

    #[error("dependency '{name}' requires version {required} but lock file has {available}")]
    DependencyVersionMismatch {
        name: String,
        required: String,
        available: String,
    },
}

/// Lock file validation errors. Validation stops at the first failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required top-level field is absent or empty.
    #[error("lock file is missing required field '{field}'")]
    MissingField { field: &'static str },

    /// An artifact entry broke a rule.
    #[error("artifact #{index} ({name}): {violation}")]
    Artifact {
        index: usize,
        name: String,
        violation: Violation,
    },
}

impl ValidationError {
    pub(crate) fn artifact(index: usize, name: &str, violation: Violation) -> Self {
        Self::Artifact {
            index,
            name: name.to_string(),
            violation,
        }
    }
}

/// Dependency graph errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A dependency is neither in the working set nor in the catalog.
    #[error("dependency '{dependency}' of '{dependent}' not found")]
    DependencyNotFound {
        dependency: String,
        dependent: String,
    },

    /// The graph contains a cycle; `involved` lists the nodes that could not be ordered.
    #[error("circular dependency detected among: {}", involved.join(", "))]
    CircularDependency { involved: Vec<String> },
}

/// Lock file I/O and decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum LockfileError {
    #[error("lock file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read lock file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write lock file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse lock file: {0}")]
    Parse(String),

    #[error("failed to serialize lock file: {0}")]
    Serialize(String),

    #[error("lock file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Requirements file errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("requirement on line {line} ('{input}'): {reason}")]
pub struct RequirementError {
    pub line: usize,
    pub input: String,
    pub reason: String,
}

/// Archive inspection errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("payload is not a valid zip archive: {0}")]
    NotZip(String),

    #[error("archive has no {0} at its root")]
    MissingMetadata(&'static str),

    #[error("invalid metadata descriptor: {0}")]
    InvalidMetadata(String),

    #[error("archive i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::NotZip(err.to_string())
    }
}

/// Install tracker errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("failed to read tracker file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write tracker file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt tracker file {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("tracker file format {found} is newer than supported format {supported}")]
    UnsupportedFormat { found: u32, supported: u32 },

    #[error("filesystem scan failed: {0}")]
    Scan(String),
}

/// Errors raised by an external installer.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("no installer for {kind} artifacts on client '{client}'")]
    NoInstaller { kind: String, client: String },

    #[error("install failed: {0}")]
    Failed(String),

    #[error("install i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Umbrella error for callers that do not care which stage failed.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    #[error(transparent)]
    Requirement(#[from] RequirementError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
