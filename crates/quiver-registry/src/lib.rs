//! Registry client, caches and fetch pipeline for Quiver.
//!
//! This crate is the async half of the engine:
//!
//! - HTTP client for the registry API with token auth and retry
//! - Source handlers for http, local path and git artifacts
//! - Disk cache for archives, ETag cache for remote lock files
//! - Concurrent, cancellable, index-ordered fetching
//! - Resolution of requirements into a lock file
//!
//! # Quick Start
//!
//! ```no_run
//! use quiver_core::{LockFile, QuiverConfig};
//! use quiver_registry::{FetchContext, Fetcher, RegistryConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let quiver = QuiverConfig::from_env()?;
//! let registry = RegistryConfig::from_env();
//! let workers = registry.concurrency;
//!
//! let lockfile = LockFile::load("quiver.lock")?;
//! let fetcher = Fetcher::new(&quiver, registry)?
//!     .with_base_dir(lockfile.base_dir().map(Into::into));
//!
//! let results = fetcher
//!     .fetch_many(&lockfile.artifacts, workers, &FetchContext::new())
//!     .await;
//! for (artifact, result) in lockfile.artifacts.iter().zip(&results) {
//!     match result {
//!         Ok(fetched) => println!("{} (cached: {})", artifact.id(), fetched.from_cache),
//!         Err(e) => println!("{}: {}", artifact.id(), e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `QUIVER_REGISTRY_URL` | Registry base URL (default: `https://registry.quiver.dev/v1`) |
//! | `QUIVER_REGISTRY_TOKEN` | Authentication token |
//! | `QUIVER_REGISTRY_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `QUIVER_REGISTRY_MAX_RETRIES` | Max retries for transient failures (default: 3) |
//! | `QUIVER_CONCURRENCY` | Fetch workers (default: 10) |
//! | `QUIVER_GIT_LOCK_TIMEOUT` | Git repository lock timeout in seconds (default: 120) |
//! | `QUIVER_SSH_KEY` | Private key for git over ssh |

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
mod digest;
pub mod error;
pub mod pipeline;
pub mod resolve;
pub mod sources;

// Re-export main types
pub use cache::{AssetCache, EtagRecord, LockfileCache};
pub use client::{AssetInfo, ConditionalOutcome, RegistryClient, VersionInfo, VersionsResponse};
pub use config::{GitConfig, RegistryConfig};
pub use context::{FetchContext, StopReason};
pub use error::{FetchError, FetchResult};
pub use pipeline::{FetchOutcome, Fetcher};
pub use resolve::Resolver;
pub use sources::{GitSource, HttpSource, PathSource, RepoLock, SourceHandler, SourceSet};
