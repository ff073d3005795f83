//! Shipper HTTP Client
//!
//! A small, type-safe HTTP client for the log-ingestion endpoint.
//!
//! # Example
//!
//! ```no_run
//! use shipper_client::IngestClient;
//! use shipper_core::domain::log::{LogLine, Stream};
//! use shipper_core::dto::log::{LogType, LogUploadRequest};
//!
//! # async fn example() -> shipper_client::Result<()> {
//! let client = IngestClient::new("http://localhost:3000/api/logs/ingest", "secret")?;
//!
//! client
//!     .send_logs(&LogUploadRequest {
//!         log_type: LogType::Runtime,
//!         lines: vec![LogLine::new(Stream::Stdout, "hello")],
//!         deployment_id: 1,
//!         hostname: "web-0".to_string(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod logs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use std::time::Duration;

/// Upper bound for a single upload request
///
/// An in-flight delivery is never cancelled, so a wedged endpoint must not
/// be able to hold the uploader forever.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the log-ingestion endpoint
#[derive(Debug, Clone)]
pub struct IngestClient {
    /// Full URL logs are POSTed to
    endpoint: String,
    /// Sent as a `Bearer` token
    token: String,
    /// HTTP client instance
    client: Client,
}

impl IngestClient {
    /// Create a new ingestion client with the default request timeout
    ///
    /// # Arguments
    /// * `endpoint` - The URL batches are POSTed to
    /// * `token` - Bearer token for the `Authorization` header
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(endpoint, token, client))
    }

    /// Create a new ingestion client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            client,
        }
    }

    /// Get the URL logs are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Handle a response that must be exactly `200 OK`
    ///
    /// The body of a successful response is ignored. Any other status is
    /// reported with whatever body the endpoint sent back.
    async fn handle_ok_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if status != reqwest::StatusCode::OK {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "(error reading response body)".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
