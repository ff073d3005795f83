//! Service layer
//!
//! Services contain the capture and delivery pipeline: the bounded queue
//! shared by all stages, the readers that feed it, and the uploader that
//! drains it into the log repository.

pub mod queue;
pub mod reader;
pub mod uploader;

pub use queue::DeliveryQueue;
pub use reader::StreamReader;
pub use uploader::{BatchUploader, UploadStats};
