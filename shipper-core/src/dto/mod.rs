//! Data Transfer Objects for the log-ingestion endpoint
//!
//! DTOs are the wire representation of a delivery attempt. They are built
//! fresh for every request and never stored.

pub mod log;
