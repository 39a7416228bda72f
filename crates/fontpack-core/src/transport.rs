//! Outbound HTTP transport.
//!
//! The pipeline only ever issues plain `GET`s carrying an [`Identity`]. The
//! [`Transport`] trait keeps that seam small so runs can be driven against
//! an in-memory upstream in tests.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use reqwest::Client;

use crate::identity::Identity;

/// A completed upstream response.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// HTTP status.
    pub status: StatusCode,
    /// Full response body.
    pub body: Bytes,
}

impl FetchedBody {
    /// Create a response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is exactly `200 OK`.
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Failure below the HTTP layer (DNS, connect, timeout, truncated body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Issues `GET` requests on behalf of the pipeline.
pub trait Transport: Send + Sync + 'static {
    /// Fetch `url` presenting `identity`, reading the whole body.
    fn get(
        &self,
        url: &str,
        identity: &Identity,
    ) -> impl Future<Output = Result<FetchedBody, TransportError>> + Send;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose every request times out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| TransportError::new(format!("failed to create client: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str, identity: &Identity) -> Result<FetchedBody, TransportError> {
        let response = self
            .client
            .get(url)
            .headers(identity.headers())
            .send()
            .await
            .map_err(|e| TransportError::new(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(format!("failed to read body: {e}")))?;

        Ok(FetchedBody { status, body })
    }
}
