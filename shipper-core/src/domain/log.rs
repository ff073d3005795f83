//! Log domain types

use serde::{Deserialize, Serialize};

/// One line captured from the supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Raw text of the line, without its terminator
    pub content: String,
    pub stream: Stream,
    /// Unix timestamp in milliseconds, taken when the line was enqueued
    pub timestamp: i64,
    /// Failed delivery attempts so far. Local bookkeeping only.
    #[serde(skip)]
    pub attempts: u32,
}

impl LogLine {
    /// Creates a line stamped with the current time
    pub fn new(stream: Stream, content: impl Into<String>) -> Self {
        Self::with_timestamp(stream, content, chrono::Utc::now().timestamp_millis())
    }

    pub fn with_timestamp(stream: Stream, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            content: content.into(),
            stream,
            timestamp,
            attempts: 0,
        }
    }
}

/// The output stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}
