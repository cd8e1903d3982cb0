//! Report bus.
//!
//! Reports travel from the scanner to the ingestion agent over an ordered,
//! durable log. Consumers commit their position only after a report has been
//! handled, so anything uncommitted is delivered again after a restart.

mod sqlite;

pub use sqlite::*;

use crate::db::MonitorReport;

use async_trait::async_trait;
use thiserror::Error;

/// Bus error types.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("undecodable message at offset {offset}: {reason}")]
    Decode { offset: i64, reason: String },
    #[error("bus lock poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Task(String),
}

/// A report read from the log, with the offset to commit once it is handled.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub offset: i64,
    pub report: MonitorReport,
}

/// Producer side: append a report without waiting for any consumer.
#[async_trait]
pub trait ReportPublisher: Send + Sync {
    async fn publish(&self, report: &MonitorReport) -> Result<(), BusError>;
}

/// Consumer side: read reports in log order and commit progress.
#[async_trait]
pub trait ReportStream: Send {
    /// Wait for the next message after the last one returned.
    async fn next(&mut self) -> Result<Delivery, BusError>;

    /// Record that everything up to and including `offset` has been handled.
    async fn commit(&mut self, offset: i64) -> Result<(), BusError>;
}
