//! Shipper configuration
//!
//! Defines the settings handed to the shipper by the platform through its
//! environment, and the tunables of the delivery pipeline.

use anyhow::Context;
use shipper_core::dto::log::LogType;
use std::ffi::OsString;
use std::time::Duration;

/// URL log batches are POSTed to
pub const ENV_LOG_ENDPOINT: &str = "_PRIVATE_ANVILOPS_LOG_ENDPOINT";
/// Bearer token for the ingestion endpoint
pub const ENV_LOG_TOKEN: &str = "_PRIVATE_ANVILOPS_LOG_TOKEN";
/// `build` or `runtime`
pub const ENV_LOG_TYPE: &str = "_PRIVATE_ANVILOPS_LOG_TYPE";
/// Integer identifier of the deployment being supervised
pub const ENV_LOG_DEPLOYMENT_ID: &str = "_PRIVATE_ANVILOPS_LOG_DEPLOYMENT_ID";

const SHIPPER_VARS: [&str; 4] = [
    ENV_LOG_ENDPOINT,
    ENV_LOG_TOKEN,
    ENV_LOG_TYPE,
    ENV_LOG_DEPLOYMENT_ID,
];

/// Environment handed to the child process
pub type ChildEnv = Vec<(OsString, OsString)>;

/// Shipper configuration
///
/// Read once at startup. Every field is required.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log ingestion URL (e.g., "https://anvilops.example.com/api/logs/ingest")
    pub log_endpoint: String,

    /// Token sent in the `Authorization: Bearer` header
    pub log_token: String,

    /// Whether the supervised process is a build or the running application
    pub log_type: LogType,

    /// Deployment the captured lines belong to
    pub deployment_id: i64,
}

impl Config {
    /// Creates configuration from the process environment
    ///
    /// Returns the configuration together with the environment the child
    /// should see, which is the current one minus the shipper's own variables.
    pub fn from_env() -> anyhow::Result<(Self, ChildEnv)> {
        Self::from_vars(std::env::vars_os())
    }

    /// Creates configuration from an arbitrary set of variables
    ///
    /// Expected variables:
    /// - _PRIVATE_ANVILOPS_LOG_ENDPOINT (required)
    /// - _PRIVATE_ANVILOPS_LOG_TOKEN (required)
    /// - _PRIVATE_ANVILOPS_LOG_TYPE (required, "build" or "runtime")
    /// - _PRIVATE_ANVILOPS_LOG_DEPLOYMENT_ID (required, non-zero integer)
    pub fn from_vars<I>(vars: I) -> anyhow::Result<(Self, ChildEnv)>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut log_endpoint = None;
        let mut log_token = None;
        let mut log_type = None;
        let mut deployment_id = None;
        let mut child_env = Vec::new();

        for (key, value) in vars {
            let Some(name) = key.to_str().filter(|k| SHIPPER_VARS.contains(k)) else {
                child_env.push((key, value));
                continue;
            };

            let value = value
                .into_string()
                .map_err(|_| anyhow::anyhow!("{} is not valid UTF-8", name))?;

            match name {
                ENV_LOG_ENDPOINT => log_endpoint = Some(value),
                ENV_LOG_TOKEN => log_token = Some(value),
                ENV_LOG_TYPE => log_type = Some(value),
                _ => deployment_id = Some(value),
            }
        }

        let log_endpoint = log_endpoint
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", ENV_LOG_ENDPOINT))?;

        let log_token = log_token
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", ENV_LOG_TOKEN))?;

        let log_type = log_type
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", ENV_LOG_TYPE))?
            .parse::<LogType>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", ENV_LOG_TYPE, e))?;

        let deployment_id = deployment_id
            .ok_or_else(|| {
                anyhow::anyhow!("{} environment variable not set", ENV_LOG_DEPLOYMENT_ID)
            })?
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Invalid {}", ENV_LOG_DEPLOYMENT_ID))?;

        let config = Self {
            log_endpoint,
            log_token,
            log_type,
            deployment_id,
        };
        config.validate()?;

        Ok((config, child_env))
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_endpoint.is_empty() {
            anyhow::bail!("Log ingest address not provided");
        }

        if !self.log_endpoint.starts_with("http://") && !self.log_endpoint.starts_with("https://")
        {
            anyhow::bail!("Log ingest address must start with http:// or https://");
        }

        if self.log_token.is_empty() {
            anyhow::bail!("Log ingest token not provided");
        }

        if self.deployment_id == 0 {
            anyhow::bail!("Deployment ID not provided");
        }

        Ok(())
    }
}

/// Tunables of the capture and delivery pipeline
///
/// The defaults are the production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Capacity of the delivery queue and maximum lines per upload
    pub max_batch_size: usize,

    /// How long a reader waits for queue space before dropping a line
    pub enqueue_timeout: Duration,

    /// How long a batch stays open for more lines after its first one
    pub batch_window: Duration,

    /// Requeues allowed after failed uploads before a line is dropped
    pub max_upload_attempts: u32,

    /// How long to wait for the uploader after the child has exited
    pub drain_timeout: Duration,

    /// Longest line forwarded in one piece
    pub max_line_length: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            enqueue_timeout: Duration::from_millis(100),
            batch_window: Duration::from_millis(500),
            max_upload_attempts: 5,
            drain_timeout: Duration::from_secs(10),
            max_line_length: 64 * 1024,
        }
    }
}
