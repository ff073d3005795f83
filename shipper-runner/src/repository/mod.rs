//! Repository layer
//!
//! Repositories abstract communication with the log-ingestion endpoint.
//! They provide a simple, focused interface without any batching or retry
//! logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod logs;

#[cfg(test)]
pub use logs::testing;

// Re-export traits
pub use logs::LogRepository;

// Re-export implementations
pub use logs::{HttpLogRepository, local_hostname};
