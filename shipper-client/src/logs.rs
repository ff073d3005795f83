//! Log upload endpoint

use crate::IngestClient;
use crate::error::Result;
use shipper_core::dto::log::LogUploadRequest;
use tracing::debug;

impl IngestClient {
    /// Send one batch of log lines to the ingestion endpoint
    ///
    /// Succeeds only on `200 OK`. Transport failures and any other status
    /// are returned as errors so the caller can decide whether to retry.
    ///
    /// # Arguments
    /// * `request` - The batch, with deployment and host metadata
    pub async fn send_logs(&self, request: &LogUploadRequest) -> Result<()> {
        if request.lines.is_empty() {
            return Ok(());
        }

        debug!(
            "Uploading {} line(s) to {}",
            request.lines.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        self.handle_ok_response(response).await
    }
}
