//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

/// Format used for every timestamp column.
pub const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("connection lock poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // Scanner and ingestion run as separate processes on the same file.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Sites ---

    /// Add a new site and return its ID.
    ///
    /// A site with a non-zero `id` keeps that id; otherwise one is assigned.
    pub fn add_site(&self, site: &mut Site) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let id = if site.id != 0 { Some(site.id) } else { None };
        conn.execute(
            "INSERT INTO sites (id, name, test_url, regex, enabled) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, site.name, site.test_url, site.regex, site.enabled],
        )?;
        site.id = conn.last_insert_rowid();
        Ok(site.id)
    }

    /// Get every site flagged as enabled.
    pub fn get_enabled_sites(&self) -> Result<Vec<Site>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, test_url, regex, enabled FROM sites WHERE enabled ORDER BY id",
        )?;

        let sites = stmt
            .query_map([], |row| {
                Ok(Site {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    test_url: row.get(2)?,
                    regex: row.get(3)?,
                    enabled: row.get(4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(sites)
    }

    // --- Reports ---

    /// Persist one report: overwrite the site's current status and append it to
    /// the history, both in a single transaction.
    ///
    /// History rows are unique per `(site_id, timestamp)`, so writing the same
    /// report again changes nothing. Returns whether a history row was added.
    pub fn record_report(&self, report: &MonitorReport) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let timestamp = report.timestamp.format(DB_TIME_FORMAT).to_string();

        tx.execute(
            "INSERT INTO site_status (site_id, reachable, status_code, content_valid, latency, last_update)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(site_id) DO UPDATE SET
             reachable=excluded.reachable, status_code=excluded.status_code,
             content_valid=excluded.content_valid, latency=excluded.latency,
             last_update=excluded.last_update",
            params![
                report.site_id,
                report.reachable,
                report.status_code,
                report.content_valid,
                report.latency_seconds,
                timestamp,
            ],
        )?;

        let inserted = tx.execute(
            "INSERT INTO site_reports (site_id, timestamp, reachable, status_code, content_valid, latency)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(site_id, timestamp) DO NOTHING",
            params![
                report.site_id,
                timestamp,
                report.reachable,
                report.status_code,
                report.content_valid,
                report.latency_seconds,
            ],
        )?;

        tx.commit()?;
        Ok(inserted > 0)
    }

    /// Get the current status row for a site.
    pub fn get_site_status(&self, site_id: i64) -> Result<Option<SiteStatus>, DbError> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT site_id, reachable, status_code, content_valid, latency, last_update
                 FROM site_status WHERE site_id = ?1",
                params![site_id],
                |row| {
                    Ok(SiteStatus {
                        site_id: row.get(0)?,
                        reachable: row.get(1)?,
                        status_code: row.get(2)?,
                        content_valid: row.get(3)?,
                        latency: row.get(4)?,
                        last_update: time_column(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    /// Get the report history for a site, oldest first.
    pub fn get_site_reports(&self, site_id: i64) -> Result<Vec<MonitorReport>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT site_id, timestamp, reachable, status_code, content_valid, latency
             FROM site_reports WHERE site_id = ?1 ORDER BY timestamp ASC",
        )?;

        let reports = stmt
            .query_map(params![site_id], |row| {
                Ok(MonitorReport {
                    site_id: row.get(0)?,
                    timestamp: time_column(row, 1)?,
                    reachable: row.get(2)?,
                    status_code: row.get(3)?,
                    content_valid: row.get(4)?,
                    latency_seconds: row.get(5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(reports)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognised timestamp {:?}", raw).into(),
        )
    })
}

/// Parse a datetime string from the database.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
