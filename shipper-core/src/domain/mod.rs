//! Core domain types
//!
//! These types represent what the shipper captures from the supervised
//! process. They are shared between the runner (which produces and batches
//! them) and the client (which serializes them onto the wire).

pub mod log;
