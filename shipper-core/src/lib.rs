//! Shipper Core
//!
//! Core types shared by the log shipper crates.
//!
//! This crate contains:
//! - Domain types: captured log lines and the stream they came from
//! - DTOs: the upload request sent to the log-ingestion endpoint

pub mod domain;
pub mod dto;
