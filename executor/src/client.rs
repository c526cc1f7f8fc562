//! HTTP client for the compute service.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::wire::{SyncComputeRequest, SyncComputeResponse};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that can execute a batch of FHE computations.
///
/// Implementations must treat a batch as all-or-nothing: either every result
/// handle comes back or an error does.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn sync_compute(
        &self,
        request: SyncComputeRequest,
    ) -> Result<SyncComputeResponse, ExecutorError>;
}

/// Sends `POST {endpoint}/sync_compute` with a JSON [`SyncComputeRequest`].
pub struct HttpExecutorClient {
    endpoint: String,
    /// HTTP client (reusable connection pool).
    http_client: reqwest::Client,
}

impl HttpExecutorClient {
    /// `endpoint` may omit the scheme (`localhost:50051`); plain HTTP is
    /// assumed in that case.
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let http_client = build_http_client(
            reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout)),
        );
        Self {
            endpoint: normalize_endpoint(endpoint),
            http_client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Build `builder`, falling back to a default client (no request
/// timeouts) when the builder is rejected.
fn build_http_client(builder: reqwest::ClientBuilder) -> reqwest::Client {
    match builder.build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "HTTP client config rejected, using default client without timeouts");
            reqwest::Client::default()
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[async_trait]
impl ComputeBackend for HttpExecutorClient {
    async fn sync_compute(
        &self,
        request: SyncComputeRequest,
    ) -> Result<SyncComputeResponse, ExecutorError> {
        let url = format!("{}/sync_compute", self.endpoint);
        debug!(
            url = %url,
            computations = request.computations.len(),
            ciphertexts = request.compressed_ciphertexts.len(),
            "sending sync_compute"
        );

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout(e.to_string())
                } else if e.is_connect() {
                    ExecutorError::Transport(format!("connection failed: {e}"))
                } else {
                    ExecutorError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ExecutorError::Transport(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        response.json::<SyncComputeResponse>().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout(e.to_string())
            } else {
                ExecutorError::InvalidResponse(format!("failed to parse sync_compute response: {e}"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_default_scheme() {
        let client = HttpExecutorClient::new("localhost:50051", DEFAULT_TIMEOUT);
        assert_eq!(client.endpoint(), "http://localhost:50051");
    }

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        let client = HttpExecutorClient::new("https://exec.internal/", Duration::from_secs(1));
        assert_eq!(client.endpoint(), "https://exec.internal");
    }

    #[test]
    fn rejected_builder_falls_back_to_default_client() {
        use reqwest::tls::Version;
        let builder = reqwest::Client::builder()
            .min_tls_version(Version::TLS_1_0)
            .max_tls_version(Version::TLS_1_1);
        let client = build_http_client(builder);
        assert!(client.get("http://localhost/").build().is_ok());
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transient_error() {
        let client = HttpExecutorClient::new("127.0.0.1:1", Duration::from_secs(2));
        let err = client
            .sync_compute(SyncComputeRequest::default())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
