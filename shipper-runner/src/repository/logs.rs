//! Logs repository
//!
//! Handles delivering log batches to the ingestion endpoint.
//! This is a stateless wrapper around the HTTP client - batching and retries
//! are handled by the service layer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use shipper_client::IngestClient;
use shipper_core::domain::log::LogLine;
use shipper_core::dto::log::{LogType, LogUploadRequest};
use tracing::warn;

use crate::config::Config;

/// Repository trait for delivering log batches
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Sends one batch of lines
    ///
    /// An `Ok` means the endpoint accepted the batch. Any error means
    /// nothing in the batch can be assumed delivered.
    ///
    /// # Arguments
    /// * `lines` - The batch to deliver
    async fn send_logs(&self, lines: &[LogLine]) -> Result<()>;
}

/// HTTP implementation of LogRepository
pub struct HttpLogRepository {
    client: IngestClient,
    log_type: LogType,
    deployment_id: i64,
    hostname: String,
}

impl HttpLogRepository {
    /// Creates a new HTTP log repository
    ///
    /// # Arguments
    /// * `config` - Endpoint, token and deployment metadata
    /// * `hostname` - Attached to every batch to identify this replica
    pub fn new(config: &Config, hostname: String) -> Result<Self> {
        let client = IngestClient::new(config.log_endpoint.clone(), config.log_token.clone())
            .context("Failed to create ingestion client")?;

        Ok(Self {
            client,
            log_type: config.log_type,
            deployment_id: config.deployment_id,
            hostname,
        })
    }
}

#[async_trait]
impl LogRepository for HttpLogRepository {
    async fn send_logs(&self, lines: &[LogLine]) -> Result<()> {
        let request = LogUploadRequest {
            log_type: self.log_type,
            lines: lines.to_vec(),
            deployment_id: self.deployment_id,
            hostname: self.hostname.clone(),
        };

        self.client
            .send_logs(&request)
            .await
            .context("Error uploading logs")
    }
}

/// Returns the name of this host, or an empty string if it cannot be read
pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Failed to read hostname: {}", e);
            String::new()
        }
    }
}
