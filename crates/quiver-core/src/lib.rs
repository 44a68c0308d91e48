//! Core engine for Quiver, a package manager for AI-client configuration
//! artifacts (skills, agents, commands, rules, MCP servers, hooks).
//!
//! This crate holds the synchronous half of the engine:
//!
//! - Version parsing, ordering and constraint matching
//! - Lock file model, versioned decoding and validation
//! - Requirements file grammar
//! - Dependency ordering and cycle detection
//! - Archive and `metadata.toml` inspection
//! - Scope matching against the caller's repository context
//! - Install tracking, reconciliation and delta computation
//! - Installation orchestration over pluggable [`install::Installer`]s
//!
//! Fetching, caching and registry access live in `quiver-registry`.
//!
//! # Quick Start
//!
//! ```
//! use quiver_core::graph::DependencyResolver;
//! use quiver_core::lockfile::LockFile;
//!
//! let lockfile = LockFile::parse(r#"
//! lock-version = 2
//! version = "1"
//! created-by = "quiver/0.4.0"
//!
//! [[assets]]
//! name = "a"
//! version = "1.0.0"
//! type = "skill"
//! path = { path = "./a" }
//!
//! [[assets]]
//! name = "b"
//! version = "1.0.0"
//! type = "skill"
//! path = { path = "./b" }
//! dependencies = [{ name = "a", version = "1.0.0" }]
//! "#).unwrap();
//!
//! let catalog = lockfile.catalog();
//! let order = DependencyResolver::new(&catalog).resolve(&lockfile.artifacts).unwrap();
//! let names: Vec<_> = order.iter().map(|a| a.name.as_str()).collect();
//! assert_eq!(names, ["a", "b"]);
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `QUIVER_CACHE_DIR` | Cache base directory (default: platform cache dir + `quiver`) |
//! | `QUIVER_GLOBAL_TARGET` | Global install target (default: home directory) |

pub mod archive;
pub mod config;
pub mod error;
mod fsutil;
pub mod graph;
pub mod install;
pub mod lockfile;
pub mod model;
pub mod requirements;
pub mod scope;
pub mod tracker;
pub mod version;

pub use archive::{ArtifactMetadata, METADATA_FILE};
pub use config::QuiverConfig;
pub use error::{CoreError, CoreResult};
pub use graph::{validate_dependencies, DependencyResolver};
pub use install::{
    ArtifactIdentity, InstallReport, InstallStatus, InstallationOrchestrator, Installer,
    InstallerProvider,
};
pub use lockfile::{LockFile, LOCKFILE_NAME, LOCK_VERSION};
pub use model::{
    Artifact, ArtifactType, Dependency, FetchedArtifact, GitSpec, HttpSpec, InstallConfig,
    PathSpec, Scope, ScopeType, Source,
};
pub use requirements::{parse_requirements, Requirement};
pub use scope::{matches_artifact, normalize_repo_url, repos_equivalent, CurrentScope};
pub use tracker::{ArtifactKey, InstallTracker, InstalledArtifact};
pub use version::{Version, VersionConstraint, VersionSpecifier};

/// Expand a leading `~/` in a user-supplied path.
pub fn expand_home(path: &str) -> Option<std::path::PathBuf> {
    fsutil::expand_home(path)
}
