//! HTTP client for the artifact registry.
//!
//! The registry is an opaque HTTP/JSON service:
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET {base}/assets/{name}/versions` | [`VersionsResponse`] |
//! | `GET {base}/assets/{name}/{version}` | [`AssetInfo`] |
//!
//! Any other URL (asset downloads, remote lock files) goes through the same
//! retry and status mapping.

mod http;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use quiver_core::model::{ArtifactType, Dependency};

use crate::config::RegistryConfig;
use crate::error::{FetchError, FetchResult};

pub use http::ConditionalOutcome;
pub(crate) use http::HttpBackend;

/// User agent for registry requests.
pub const REGISTRY_USER_AGENT: &str = concat!("quiver-registry/", env!("CARGO_PKG_VERSION"));

/// Response from `GET /assets/{name}/versions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub name: String,
    pub versions: Vec<VersionInfo>,
}

/// One published version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    /// Yanked versions are never selected.
    #[serde(default)]
    pub yanked: bool,
}

/// Response from `GET /assets/{name}/{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub name: String,
    pub version: String,

    #[serde(rename = "type")]
    pub kind: ArtifactType,

    #[serde(default)]
    pub description: Option<String>,

    pub download_url: String,

    /// Algorithm → hex digest.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub clients: Vec<String>,

    /// Versions here are constraints.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Registry client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    backend: HttpBackend,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(config: RegistryConfig) -> FetchResult<Self> {
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(REGISTRY_USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| FetchError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self {
            backend: HttpBackend {
                client,
                base_url,
                config,
            },
        })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> FetchResult<Self> {
        Self::new(RegistryConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.backend.base_url
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.backend.config
    }

    /// Published, non-yanked versions of `name`, in registry order.
    pub async fn list_versions(&self, name: &str) -> FetchResult<Vec<String>> {
        let url = format!("{}/assets/{}/versions", self.backend.base_url, name);
        debug!(url = %url, "listing versions");

        let response = self.backend.request(reqwest::Method::GET, &url, None).await?;
        let body: VersionsResponse = response.json().await.map_err(|e| FetchError::InvalidResponse {
            message: format!("failed to parse versions response: {}", e),
        })?;

        Ok(body
            .versions
            .into_iter()
            .filter(|v| !v.yanked)
            .map(|v| v.version)
            .collect())
    }

    /// Download location and integrity data for `name@version`.
    pub async fn asset_info(&self, name: &str, version: &str) -> FetchResult<AssetInfo> {
        let url = format!("{}/assets/{}/{}", self.backend.base_url, name, version);
        debug!(url = %url, "fetching asset info");

        let response = self.backend.request(reqwest::Method::GET, &url, None).await?;
        let mut info: AssetInfo = response.json().await.map_err(|e| FetchError::InvalidResponse {
            message: format!("failed to parse asset info: {}", e),
        })?;

        if info.name != name {
            return Err(FetchError::InvalidResponse {
                message: format!("asked for '{}', registry answered '{}'", name, info.name),
            });
        }
        if info.download_url.starts_with('/') {
            info.download_url = format!("{}{}", self.backend.base_url, info.download_url);
        }
        Ok(info)
    }

    /// Conditional GET of a remote lock file.
    pub async fn fetch_lockfile(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> FetchResult<ConditionalOutcome> {
        debug!(url, etag = ?etag, "fetching remote lock file");
        self.backend.get_conditional(url, etag).await
    }

    /// GET any URL through the retrying backend.
    pub async fn download(&self, url: &str) -> FetchResult<Vec<u8>> {
        self.backend.get_bytes(url).await
    }

    pub(crate) fn backend(&self) -> &HttpBackend {
        &self.backend
    }
}
