use async_trait::async_trait;
use tracing::{debug, info};

use quiver_core::archive::is_valid_archive;
use quiver_core::model::{Artifact, Source};

use super::SourceHandler;
use crate::client::RegistryClient;
use crate::context::FetchContext;
use crate::digest::verify_hashes;
use crate::error::{FetchError, FetchResult};

/// Progress is reported once per this many bytes.
pub const PROGRESS_CHUNK: u64 = 64 * 1024;

/// Downloads archives over HTTP and checks size, hashes and zip-ness.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: RegistryClient,
}

impl HttpSource {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Stream `url`, calling `on_progress(bytes_so_far, total)` at every
    /// 64 KiB boundary and once at the end. `total` is the expected size, or
    /// the `Content-Length` when none was declared.
    ///
    /// A body larger than `expected_size` is cut off early.
    pub async fn fetch_with_progress<F>(
        &self,
        url: &str,
        expected_size: Option<u64>,
        mut on_progress: F,
    ) -> FetchResult<Vec<u8>>
    where
        F: FnMut(u64, Option<u64>) + Send,
    {
        let mut response = self
            .client
            .backend()
            .request(reqwest::Method::GET, url, None)
            .await?;
        let total = expected_size.or_else(|| response.content_length());

        let mut body = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut next_report = PROGRESS_CHUNK;

        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            let so_far = body.len() as u64;

            if let Some(expected) = expected_size {
                if so_far > expected {
                    return Err(FetchError::integrity(
                        url,
                        format!("size exceeds declared {} bytes", expected),
                    ));
                }
            }

            while so_far >= next_report {
                on_progress(next_report, total);
                next_report += PROGRESS_CHUNK;
            }
        }

        on_progress(body.len() as u64, total);
        Ok(body)
    }
}

#[async_trait]
impl SourceHandler for HttpSource {
    async fn fetch(&self, artifact: &Artifact, _ctx: &FetchContext) -> FetchResult<Vec<u8>> {
        let Source::Http(spec) = &artifact.source else {
            return Err(FetchError::source(&artifact.name, "not an http source"));
        };

        debug!(name = %artifact.name, url = %spec.url, "downloading archive");
        let bytes = self
            .fetch_with_progress(&spec.url, spec.size, |_, _| {})
            .await
            .map_err(|e| match e {
                FetchError::Integrity { reason, .. } => FetchError::integrity(&artifact.name, reason),
                other => other,
            })?;

        if let Some(expected) = spec.size {
            if bytes.len() as u64 != expected {
                return Err(FetchError::integrity(
                    &artifact.name,
                    format!("size mismatch: expected {} bytes, got {}", expected, bytes.len()),
                ));
            }
        }

        verify_hashes(&artifact.name, &bytes, &spec.hashes)?;

        if !is_valid_archive(&bytes) {
            return Err(FetchError::integrity(&artifact.name, "payload is not a zip archive"));
        }

        info!(
            name = %artifact.name,
            version = %artifact.version,
            bytes = bytes.len(),
            "downloaded archive"
        );
        Ok(bytes)
    }
}
