//! SQLite-backed report log.
//!
//! One table holds every published message in append order; a second holds
//! the committed position of each consumer group. Publishers and consumers in
//! different processes share the log through the same database file.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{BusError, Delivery, ReportPublisher, ReportStream};
use crate::db::{MonitorReport, DB_TIME_FORMAT};

/// A topic on the SQLite log.
#[derive(Clone)]
pub struct SqliteBus {
    conn: Arc<Mutex<Connection>>,
    topic: String,
}

impl SqliteBus {
    /// Open (or create) the log at `path` and bind it to `topic`.
    pub fn open<P: AsRef<Path>>(path: P, topic: &str) -> Result<Self, BusError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch(include_str!("../../migrations/bus_000001_init.up.sql"))
            .map_err(|e| BusError::Migration(format!("Bus migration 1 failed: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            topic: topic.to_string(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BusError> {
        self.conn.lock().map_err(|_| BusError::Poisoned)
    }

    /// Append a report keyed by its site and return its offset.
    pub fn append(&self, report: &MonitorReport) -> Result<i64, BusError> {
        let payload = serde_json::to_string(report)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bus_messages (topic, partition_key, payload, published_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                self.topic,
                report.site_id,
                payload,
                Utc::now().format(DB_TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Last offset committed by `group`, or 0 if it never committed.
    pub fn committed(&self, group: &str) -> Result<i64, BusError> {
        let conn = self.conn()?;
        let committed = conn
            .query_row(
                "SELECT committed FROM bus_offsets WHERE group_name = ?1 AND topic = ?2",
                params![group, self.topic],
                |row| row.get(0),
            )
            .optional()?;
        Ok(committed.unwrap_or(0))
    }

    /// Move the committed offset of `group` forward. Never moves it back.
    pub fn commit_offset(&self, group: &str, offset: i64) -> Result<(), BusError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO bus_offsets (group_name, topic, committed) VALUES (?1, ?2, ?3)
             ON CONFLICT(group_name, topic) DO UPDATE SET
             committed=MAX(committed, excluded.committed)",
            params![group, self.topic, offset],
        )?;
        Ok(())
    }

    /// First message after `offset` on this topic, if any.
    fn read_after(&self, offset: i64) -> Result<Option<(i64, String)>, BusError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT position, payload FROM bus_messages
                 WHERE topic = ?1 AND position > ?2 ORDER BY position ASC LIMIT 1",
                params![self.topic, offset],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// A consumer for `group`, starting right after its committed offset.
    pub fn consumer(&self, group: &str, poll_interval: Duration) -> Result<SqliteConsumer, BusError> {
        let position = self.committed(group)?;
        tracing::info!(
            "Consumer group {} resuming topic {} after offset {}",
            group,
            self.topic,
            position
        );
        Ok(SqliteConsumer {
            bus: self.clone(),
            group: group.to_string(),
            position,
            poll_interval,
        })
    }
}

/// Decode a payload and check the report invariant.
fn decode(offset: i64, payload: &str) -> Result<MonitorReport, BusError> {
    let report: MonitorReport = serde_json::from_str(payload).map_err(|e| BusError::Decode {
        offset,
        reason: e.to_string(),
    })?;
    if !report.is_consistent() {
        return Err(BusError::Decode {
            offset,
            reason: "optional fields disagree with reachable flag".to_string(),
        });
    }
    Ok(report)
}

async fn blocking<T, F>(f: F) -> Result<T, BusError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BusError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BusError::Task(e.to_string()))?
}

#[async_trait]
impl ReportPublisher for SqliteBus {
    async fn publish(&self, report: &MonitorReport) -> Result<(), BusError> {
        let bus = self.clone();
        let report = report.clone();
        blocking(move || bus.append(&report)).await?;
        Ok(())
    }
}

/// Reads one topic in order on behalf of a consumer group.
pub struct SqliteConsumer {
    bus: SqliteBus,
    group: String,
    /// Offset of the last message handed out.
    position: i64,
    poll_interval: Duration,
}

#[async_trait]
impl ReportStream for SqliteConsumer {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            let bus = self.bus.clone();
            let after = self.position;
            match blocking(move || bus.read_after(after)).await? {
                Some((offset, payload)) => {
                    self.position = offset;
                    let report = decode(offset, &payload)?;
                    return Ok(Delivery { offset, report });
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn commit(&mut self, offset: i64) -> Result<(), BusError> {
        let bus = self.bus.clone();
        let group = self.group.clone();
        blocking(move || bus.commit_offset(&group, offset)).await
    }
}
