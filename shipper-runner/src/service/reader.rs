//! Stream reader
//!
//! Reads one output stream of the child line by line, echoes every line to
//! the matching local stream so `kubectl logs` and friends keep working, and
//! enqueues it for upload.

use shipper_core::domain::log::{LogLine, Stream};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::config::PipelineSettings;
use crate::service::queue::{DeliveryQueue, EnqueueError};

/// Outcome of reading one line with a length limit
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    /// A terminated line, or the unterminated tail of the stream
    Complete,
    /// The limit was hit before a terminator; the rest follows in later reads
    Partial,
    /// Nothing left to read
    Eof,
}

/// Reads the next line into `buf`, never buffering more than `limit` bytes
///
/// The terminator is not stored; a `\r` right before it is dropped as well.
/// A `limit` of zero is treated as one.
pub async fn read_line_limited<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = limit.max(1);
    buf.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if buf.is_empty() {
                LineRead::Eof
            } else {
                LineRead::Complete
            });
        }

        // A terminator right after a line of exactly `limit` bytes still
        // belongs to that line, even when it arrives in the next fill.
        let room = limit - buf.len();
        let search = &available[..available.len().min(room + 1)];
        if let Some(pos) = search.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&search[..pos]);
            reader.consume(pos + 1);
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            return Ok(LineRead::Complete);
        }

        if room == 0 {
            return Ok(LineRead::Partial);
        }

        let taken = available.len().min(room);
        buf.extend_from_slice(&available[..taken]);
        reader.consume(taken);
    }
}

/// Counters reported when a reader finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines_read: u64,
    pub lines_dropped: u64,
}

/// Reads one child stream until end-of-stream
pub struct StreamReader<R, W> {
    stream: Stream,
    reader: BufReader<R>,
    echo: W,
    queue: DeliveryQueue,
    enqueue_timeout: Duration,
    max_line_length: usize,
}

impl<R, W> StreamReader<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a reader for one stream
    ///
    /// # Arguments
    /// * `stream` - Which stream the lines are tagged with
    /// * `source` - The child's end of the pipe
    /// * `echo` - Local output every line is copied to
    /// * `queue` - Where lines are handed to the uploader
    /// * `settings` - Enqueue timeout and line length limit
    pub fn new(
        stream: Stream,
        source: R,
        echo: W,
        queue: DeliveryQueue,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            stream,
            reader: BufReader::new(source),
            echo,
            queue,
            enqueue_timeout: settings.enqueue_timeout,
            max_line_length: settings.max_line_length,
        }
    }

    /// Runs until the child closes its end of the stream
    pub async fn run(mut self) -> ReaderStats {
        let mut stats = ReaderStats::default();
        let mut buf = Vec::new();

        loop {
            match read_line_limited(&mut self.reader, &mut buf, self.max_line_length).await {
                Ok(LineRead::Eof) => break,
                Ok(read) => {
                    if read == LineRead::Partial {
                        debug!(
                            "Line on {} exceeded {} bytes, forwarding it in pieces",
                            self.stream, self.max_line_length
                        );
                    }
                    stats.lines_read += 1;
                    self.echo_line(&buf).await;
                    if !self.enqueue(&buf).await {
                        stats.lines_dropped += 1;
                    }
                }
                Err(e) => {
                    warn!("Error reading {}: {}", self.stream, e);
                    break;
                }
            }
        }

        debug!(
            "Finished reading {}: {} line(s), {} dropped",
            self.stream, stats.lines_read, stats.lines_dropped
        );
        stats
    }

    async fn echo_line(&mut self, line: &[u8]) {
        let result = async {
            self.echo.write_all(line).await?;
            self.echo.write_all(b"\n").await?;
            self.echo.flush().await
        }
        .await;

        if let Err(e) = result {
            debug!("Failed to echo {} line locally: {}", self.stream, e);
        }
    }

    /// Returns false if the line was dropped
    async fn enqueue(&mut self, line: &[u8]) -> bool {
        let line = LogLine::new(self.stream, String::from_utf8_lossy(line));

        match self.queue.enqueue(line, self.enqueue_timeout).await {
            Ok(()) => true,
            Err(EnqueueError::Full(line)) => {
                warn!("Upload buffer is full, dropping {} line", line.stream);
                false
            }
            Err(EnqueueError::Closed(line)) => {
                debug!("Upload queue closed, dropping {} line: {}", line.stream, line.content);
                false
            }
        }
    }
}
