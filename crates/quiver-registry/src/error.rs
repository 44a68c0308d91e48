//! Error types for fetching, caching and registry access.

use std::path::PathBuf;
use std::time::Duration;

use quiver_core::CoreError;

/// Fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure or unexpected server error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Payload failed a size, hash or archive check.
    #[error("integrity check failed for {name}: {reason}")]
    Integrity { name: String, reason: String },

    /// Registry has no such resource.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Authentication failed or token invalid.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Cache I/O failure.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// A source handler could not produce an archive.
    #[error("source error for {name}: {message}")]
    Source { name: String, message: String },

    /// A git command failed.
    #[error("git error: {message}")]
    Git { message: String },

    /// Could not acquire the repository lock in time.
    #[error("could not acquire lock {} within {waited:?}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Caller cancelled before this unit started.
    #[error("cancelled before fetching item {index}")]
    Cancelled { index: usize },

    /// Deadline passed before this unit started.
    #[error("deadline exceeded before fetching item {index}")]
    DeadlineExceeded { index: usize },

    /// No version satisfies the collected constraints.
    #[error("cannot resolve {name}: {message}")]
    Resolution { name: String, message: String },

    /// Invalid response from registry.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl FetchError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } | Self::Config { .. } | Self::Resolution { .. } => 1,
            Self::Unauthorized { .. } => 2,
            Self::Integrity { .. } => 4,
            Self::RateLimited { .. } | Self::Network { .. } => 5,
            Self::Cache { .. } | Self::InvalidResponse { .. } => 6,
            Self::Source { .. } | Self::Git { .. } | Self::LockTimeout { .. } => 7,
            Self::Core(_) => 8,
            Self::Cancelled { .. } | Self::DeadlineExceeded { .. } => 130,
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }

    /// Wait the server asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the caller stopped the run, as opposed to the item failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    pub(crate) fn integrity(name: &str, reason: impl Into<String>) -> Self {
        Self::Integrity {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn source(name: &str, message: impl Into<String>) -> Self {
        Self::Source {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;
