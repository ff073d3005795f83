//! Batch uploader
//!
//! Drains the delivery queue into batches and hands them to the log
//! repository. A batch is sent when it reaches the size limit, when its
//! window expires, or when the queue is closed and empty.
//!
//! Failed batches are retried line by line: each line goes back into the
//! queue with its attempt counter bumped, until the cap is reached.

use shipper_core::domain::log::LogLine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::PipelineSettings;
use crate::repository::LogRepository;
use crate::service::queue::{DeliveryQueue, QueueReceiver};

/// Summary returned once the uploader has drained the queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub lines_delivered: u64,
    pub lines_dropped: u64,
}

/// Consumer side of the delivery pipeline
pub struct BatchUploader {
    receiver: QueueReceiver,
    /// Used only to requeue lines of failed batches
    queue: DeliveryQueue,
    repository: Arc<dyn LogRepository>,
    max_batch_size: usize,
    batch_window: Duration,
    max_upload_attempts: u32,
    stats: UploadStats,
}

impl BatchUploader {
    /// Creates an uploader
    ///
    /// # Arguments
    /// * `queue` - Producer handle of the queue, for retries
    /// * `receiver` - The queue's consumer half
    /// * `repository` - Where batches are delivered
    /// * `settings` - Batch size, batch window and attempt cap
    pub fn new(
        queue: DeliveryQueue,
        receiver: QueueReceiver,
        repository: Arc<dyn LogRepository>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            receiver,
            queue,
            repository,
            max_batch_size: settings.max_batch_size,
            batch_window: settings.batch_window,
            max_upload_attempts: settings.max_upload_attempts,
            stats: UploadStats::default(),
        }
    }

    /// Runs until the queue is closed and fully drained
    pub async fn run(mut self) -> UploadStats {
        debug!(
            "Uploader started (batch size: {}, window: {:?})",
            self.max_batch_size, self.batch_window
        );

        while let Some(batch) = self.next_batch().await {
            self.deliver(batch).await;
        }

        info!(
            "Log upload finished: {} line(s) delivered in {} batch(es), {} failed batch(es), {} line(s) dropped",
            self.stats.lines_delivered,
            self.stats.batches_sent,
            self.stats.batches_failed,
            self.stats.lines_dropped
        );
        self.stats
    }

    /// Collects the next batch
    ///
    /// Waits for a first line, then keeps accepting lines until the batch is
    /// full, the window expires or the queue runs dry after closing.
    /// Returns `None` when there is nothing left to send.
    async fn next_batch(&mut self) -> Option<Vec<LogLine>> {
        let first = self.receiver.recv().await?;

        let mut batch = Vec::with_capacity(self.max_batch_size);
        batch.push(first);

        let window = tokio::time::sleep(self.batch_window);
        tokio::pin!(window);

        while batch.len() < self.max_batch_size {
            tokio::select! {
                _ = &mut window => break,
                line = self.receiver.recv() => match line {
                    Some(line) => batch.push(line),
                    None => break,
                },
            }
        }

        Some(batch)
    }

    async fn deliver(&mut self, batch: Vec<LogLine>) {
        match self.repository.send_logs(&batch).await {
            Ok(()) => {
                debug!("Delivered batch of {} line(s)", batch.len());
                self.stats.batches_sent += 1;
                self.stats.lines_delivered += batch.len() as u64;
            }
            Err(e) => {
                error!("{:#}", e);
                self.stats.batches_failed += 1;
                self.requeue(batch);
            }
        }
    }

    /// Puts the lines of a failed batch back into the queue
    ///
    /// A line is sent at most `max_upload_attempts + 1` times in total.
    /// Requeueing never waits: blocking here would stall the only consumer
    /// of the queue we are pushing into.
    fn requeue(&mut self, batch: Vec<LogLine>) {
        let mut expired = 0u64;
        let mut overflow = 0u64;

        for mut line in batch {
            line.attempts += 1;
            if line.attempts > self.max_upload_attempts {
                expired += 1;
                continue;
            }

            if self.queue.requeue(line).is_err() {
                overflow += 1;
            }
        }

        if expired > 0 {
            warn!(
                "Dropping {} line(s) after {} failed upload attempts",
                expired,
                self.max_upload_attempts + 1
            );
        }
        if overflow > 0 {
            warn!(
                "Upload buffer is full, dropping {} line(s) from failed batch",
                overflow
            );
        }

        self.stats.lines_dropped += expired + overflow;
    }
}
