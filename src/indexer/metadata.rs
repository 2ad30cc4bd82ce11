//! Off-chain token metadata: token URI resolution and the HTTP fetch.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::errors::FetchError;

const HTTP_PREFIX: &str = "http://";
const HTTPS_PREFIX: &str = "https://";
const IPFS_PREFIX: &str = "ipfs://";

/// A fetchable location derived from a token URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget(String);

impl FetchTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// HTTP(S) URIs are fetched as-is and `ipfs://` URIs are rewritten onto
/// `ipfs_gateway`. Anything else has no target.
pub fn resolve(token_uri: &str, ipfs_gateway: &str) -> Option<FetchTarget> {
    if token_uri.starts_with(HTTP_PREFIX) || token_uri.starts_with(HTTPS_PREFIX) {
        Some(FetchTarget(token_uri.to_string()))
    } else {
        token_uri
            .strip_prefix(IPFS_PREFIX)
            .map(|path| FetchTarget(format!("{ipfs_gateway}{path}")))
    }
}

#[async_trait]
pub trait MetadataTransport: Send + Sync {
    /// GET the target and return the body as text, whatever the status code.
    async fn get(&self, target: &FetchTarget) -> Result<String, FetchError>;
}

pub struct HttpMetadataTransport {
    client: reqwest::Client,
}

impl HttpMetadataTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataTransport for HttpMetadataTransport {
    async fn get(&self, target: &FetchTarget) -> Result<String, FetchError> {
        let http_error = |source| FetchError::Http {
            url: target.as_str().to_string(),
            source,
        };

        let response = self
            .client
            .get(target.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(http_error)?;

        debug!("Metadata response from {}: {}", target.as_str(), response.status());

        response.text().await.map_err(http_error)
    }
}

pub struct MetadataFetcher {
    transport: Arc<dyn MetadataTransport>,
    ipfs_gateway: String,
    timeout: Duration,
}

impl MetadataFetcher {
    pub fn new(
        transport: Arc<dyn MetadataTransport>,
        ipfs_gateway: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            ipfs_gateway: ipfs_gateway.into(),
            timeout,
        }
    }

    /// Returns an empty body without touching the network when the URI has no target.
    pub async fn fetch(&self, token_uri: &str) -> Result<String, FetchError> {
        let Some(target) = resolve(token_uri, &self.ipfs_gateway) else {
            debug!("No fetchable target for token URI {:?}", token_uri);
            return Ok(String::new());
        };

        tokio::time::timeout(self.timeout, self.transport.get(&target))
            .await
            .map_err(|_| FetchError::Timeout {
                url: target.as_str().to_string(),
                timeout: self.timeout,
            })?
    }
}
