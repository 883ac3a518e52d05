//! The ingestion pipeline: resolves each fetched message against existing
//! tickets and applies it in a single crash-safe transaction.

pub mod engine;
pub mod error;
pub mod report;
pub mod resolver;

pub use engine::SyncEngine;
pub use error::SyncError;
pub use report::{ConnectionReport, FailedMessage, RunStatus, SyncReport};
pub use resolver::{resolve, Resolution};
