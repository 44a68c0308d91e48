//! Registry, fetch and git configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};

/// Registry and fetch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL for the registry.
    #[serde(default = "default_registry_url")]
    pub url: String,

    /// Authentication token.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fetch workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long to wait for the git repository lock.
    #[serde(default = "default_git_lock_timeout")]
    pub git_lock_timeout_secs: u64,

    /// Private key for git over ssh.
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
}

fn default_registry_url() -> String {
    "https://registry.quiver.dev/v1".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrency() -> usize {
    10
}

fn default_git_lock_timeout() -> u64 {
    120
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            token: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            git_lock_timeout_secs: default_git_lock_timeout(),
            ssh_key: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl RegistryConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `QUIVER_REGISTRY_URL` | Registry base URL |
    /// | `QUIVER_REGISTRY_TOKEN` | Authentication token |
    /// | `QUIVER_REGISTRY_TIMEOUT` | Request timeout in seconds |
    /// | `QUIVER_REGISTRY_MAX_RETRIES` | Max retries for transient failures |
    /// | `QUIVER_CONCURRENCY` | Fetch workers |
    /// | `QUIVER_GIT_LOCK_TIMEOUT` | Git repository lock timeout in seconds |
    /// | `QUIVER_SSH_KEY` | Private key for git over ssh |
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("QUIVER_REGISTRY_URL").unwrap_or_else(|_| default_registry_url()),
            token: std::env::var("QUIVER_REGISTRY_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            timeout_secs: env_parse("QUIVER_REGISTRY_TIMEOUT").unwrap_or_else(default_timeout),
            max_retries: env_parse("QUIVER_REGISTRY_MAX_RETRIES")
                .unwrap_or_else(default_max_retries),
            concurrency: env_parse("QUIVER_CONCURRENCY").unwrap_or_else(default_concurrency),
            git_lock_timeout_secs: env_parse("QUIVER_GIT_LOCK_TIMEOUT")
                .unwrap_or_else(default_git_lock_timeout),
            ssh_key: std::env::var_os("QUIVER_SSH_KEY")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    pub fn with_git_lock_timeout(mut self, timeout: Duration) -> Self {
        self.git_lock_timeout_secs = timeout.as_secs();
        self
    }

    /// Check that the base URL is usable.
    pub fn validate(&self) -> FetchResult<()> {
        let parsed = url::Url::parse(&self.url).map_err(|e| FetchError::Config {
            message: format!("invalid registry url '{}': {}", self.url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Config {
                message: format!("registry url must be http(s): {}", self.url),
            });
        }
        Ok(())
    }

    /// Git settings derived from this config.
    pub fn git_config(&self) -> GitConfig {
        GitConfig {
            ssh_key: self.ssh_key.clone(),
            lock_timeout: Duration::from_secs(self.git_lock_timeout_secs),
        }
    }
}

/// Settings handed to the git source at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConfig {
    pub ssh_key: Option<PathBuf>,
    pub lock_timeout: Duration,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            ssh_key: None,
            lock_timeout: Duration::from_secs(default_git_lock_timeout()),
        }
    }
}

impl GitConfig {
    /// Value for `GIT_SSH_COMMAND`, when a key is configured.
    pub fn ssh_command(&self) -> Option<String> {
        self.ssh_key.as_ref().map(|key| {
            format!(
                "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                key.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.url, "https://registry.quiver.dev/v1");
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.git_config().lock_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("QUIVER_REGISTRY_URL", "http://localhost:8080");
        std::env::set_var("QUIVER_CONCURRENCY", "4");
        std::env::set_var("QUIVER_REGISTRY_MAX_RETRIES", "not-a-number");
        std::env::set_var("QUIVER_SSH_KEY", "/keys/deploy");
        let config = RegistryConfig::from_env();
        for var in [
            "QUIVER_REGISTRY_URL",
            "QUIVER_CONCURRENCY",
            "QUIVER_REGISTRY_MAX_RETRIES",
            "QUIVER_SSH_KEY",
        ] {
            std::env::remove_var(var);
        }

        assert_eq!(config.url, "http://localhost:8080");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.git_config().ssh_command().unwrap(),
            "ssh -i '/keys/deploy' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new"
        );
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        assert!(RegistryConfig::default().with_url("not a url").validate().is_err());
        assert!(RegistryConfig::default()
            .with_url("ftp://example.com")
            .validate()
            .is_err());
    }
}
