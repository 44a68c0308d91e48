//! HTTP layer: status mapping and retry.
//!
//! This is the only place that interprets status codes; `client/mod.rs` and
//! the source handlers work with mapped [`FetchError`]s.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{AUTHORIZATION, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{FetchError, FetchResult};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Wait before retry number `attempt` (1-based).
///
/// A server `Retry-After` is honoured, capped and spread by 10%. Anything
/// else gets full-jitter exponential backoff.
fn retry_delay(err: &FetchError, attempt: u32) -> Duration {
    let mut rng = rand::thread_rng();
    match err.retry_after() {
        Some(wait) => wait
            .min(MAX_RETRY_DELAY)
            .mul_f64(rng.gen_range(0.9..=1.1))
            .max(Duration::from_millis(100)),
        None => {
            let ceiling = Duration::from_secs(1 << attempt.min(5)).min(MAX_RETRY_DELAY);
            ceiling
                .mul_f64(rng.gen_range(0.0..=1.0))
                .max(Duration::from_millis(10))
        }
    }
}

/// Outcome of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalOutcome {
    NotModified,
    Fetched { content: String, etag: Option<String> },
}

/// Holds the reqwest client, auth and retry policy.
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) config: RegistryConfig,
}

impl HttpBackend {
    /// GET with `If-None-Match`; 304 maps to `NotModified`.
    pub(crate) async fn get_conditional(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> FetchResult<ConditionalOutcome> {
        let response = self.request(reqwest::Method::GET, url, etag).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url, "not modified (304)");
            return Ok(ConditionalOutcome::NotModified);
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content = response.text().await.map_err(|e| FetchError::Network {
            message: format!("failed to read response body: {}", e),
        })?;

        Ok(ConditionalOutcome::Fetched { content, etag })
    }

    /// GET the full body.
    pub(crate) async fn get_bytes(&self, url: &str) -> FetchResult<Vec<u8>> {
        let response = self.request(reqwest::Method::GET, url, None).await?;
        let bytes = response.bytes().await.map_err(|e| FetchError::Network {
            message: format!("failed to read response body: {}", e),
        })?;
        Ok(bytes.to_vec())
    }

    /// Make a request, retrying whatever [`FetchError::is_retryable`] accepts.
    pub(crate) async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        etag: Option<&str>,
    ) -> FetchResult<reqwest::Response> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0;

        loop {
            let err = match self.request_once(method.clone(), url, etag).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= max_retries {
                return Err(err);
            }

            attempt += 1;
            let delay = retry_delay(&err, attempt);
            warn!(
                error = %err,
                url,
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn is_registry_url(&self, url: &str) -> bool {
        url.strip_prefix(&self.base_url)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?']))
    }

    async fn request_once(
        &self,
        method: reqwest::Method,
        url: &str,
        etag: Option<&str>,
    ) -> FetchResult<reqwest::Response> {
        let mut request = self.client.request(method, url);

        // The token only goes to the registry itself.
        if let Some(token) = self.config.token.as_deref() {
            if self.is_registry_url(url) {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }
        }

        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        match status.as_u16() {
            200..=299 | 304 => Ok(response),

            401 | 403 => Err(FetchError::Unauthorized {
                message: format!("HTTP {} for {}", status.as_u16(), url),
            }),

            404 | 410 => Err(FetchError::NotFound {
                resource: url.to_string(),
            }),

            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(FetchError::RateLimited { retry_after })
            }

            500..=599 => {
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                Err(FetchError::Network {
                    message: format!("HTTP {}: {}", status.as_u16(), message),
                })
            }

            _ => {
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                Err(FetchError::InvalidResponse {
                    message: format!("HTTP {}: {}", status.as_u16(), message),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_honours_retry_after() {
        let err = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        for attempt in 1..=4 {
            let delay = retry_delay(&err, attempt);
            assert!(delay >= Duration::from_millis(4500), "{:?}", delay);
            assert!(delay <= Duration::from_millis(5500), "{:?}", delay);
        }

        let huge = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert!(retry_delay(&huge, 1) <= Duration::from_secs(33));
    }

    #[test]
    fn test_retry_delay_backs_off_exponentially() {
        let err = FetchError::Network {
            message: "HTTP 503".to_string(),
        };
        for _ in 0..50 {
            assert!(retry_delay(&err, 1) <= Duration::from_secs(2));
            assert!(retry_delay(&err, 3) <= Duration::from_secs(8));
            assert!(retry_delay(&err, 20) <= MAX_RETRY_DELAY);
            assert!(retry_delay(&err, 1) >= Duration::from_millis(10));
        }
    }
}
