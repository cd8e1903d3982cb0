//! Ingestion agent.
//!
//! Reads reports from the bus one at a time and writes each of them into the
//! store. The bus position is committed only after the write succeeded.

use crate::bus::{BusError, ReportStream};
use crate::db::{DbError, MonitorReport, Store};

use thiserror::Error;

/// Agent error types. Any of these stops the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("store error: {0}")]
    Db(#[from] DbError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// Sequential consumer that persists reports.
pub struct IngestionAgent<S> {
    store: Store,
    stream: S,
}

impl<S: ReportStream> IngestionAgent<S> {
    pub fn new(store: Store, stream: S) -> Self {
        Self { store, stream }
    }

    /// Handle the next message on the stream.
    ///
    /// A failed write is returned without committing, so the report is
    /// delivered again once the consumer restarts. Messages that cannot be
    /// decoded are logged and skipped.
    pub async fn process_next(&mut self) -> Result<(), AgentError> {
        let delivery = match self.stream.next().await {
            Ok(delivery) => delivery,
            Err(BusError::Decode { offset, reason }) => {
                tracing::warn!("Skipping undecodable report at offset {}: {}", offset, reason);
                self.stream.commit(offset).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            "Processing report for site {} at {} (offset {})",
            delivery.report.site_id,
            delivery.report.timestamp,
            delivery.offset
        );

        let inserted = match self.ingest(delivery.report).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::error!("Failed to store report at offset {}: {}", delivery.offset, e);
                return Err(e.into());
            }
        };
        if !inserted {
            tracing::debug!("Report at offset {} was already recorded", delivery.offset);
        }

        self.stream.commit(delivery.offset).await?;
        Ok(())
    }

    async fn ingest(&self, report: MonitorReport) -> Result<bool, DbError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.record_report(&report))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    /// Process reports until something fails.
    pub async fn run(mut self) -> Result<(), AgentError> {
        tracing::info!("Ingestion agent started");
        loop {
            self.process_next().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ReportPublisher, SqliteBus};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const POLL: Duration = Duration::from_millis(10);
    const GROUP: &str = "sitemon-ingest";

    struct Fixture {
        _db: NamedTempFile,
        _log: NamedTempFile,
        store: Store,
        bus: SqliteBus,
    }

    impl Fixture {
        fn new() -> Self {
            let db = NamedTempFile::new().unwrap();
            let log = NamedTempFile::new().unwrap();
            let store = Store::new(db.path()).unwrap();
            let bus = SqliteBus::open(log.path(), "monitor_reports").unwrap();
            Self {
                _db: db,
                _log: log,
                store,
                bus,
            }
        }

        fn agent(&self) -> IngestionAgent<crate::bus::SqliteConsumer> {
            let consumer = self.bus.consumer(GROUP, POLL).unwrap();
            IngestionAgent::new(self.store.clone(), consumer)
        }
    }

    #[tokio::test]
    async fn test_ingest_single_report() {
        let fx = Fixture::new();
        let ts = Utc.with_ymd_and_hms(2021, 2, 14, 10, 27, 0).unwrap();
        let report = MonitorReport::reachable(0, ts, 200, true, 1.0);
        fx.bus.publish(&report).await.unwrap();

        let mut agent = fx.agent();
        agent.process_next().await.unwrap();

        let status = fx.store.get_site_status(0).unwrap().unwrap();
        assert!(status.reachable);
        assert_eq!(status.status_code, Some(200));
        assert_eq!(status.content_valid, Some(true));
        assert_eq!(status.latency, Some(1.0));
        assert_eq!(status.last_update, ts);

        let history = fx.store.get_site_reports(0).unwrap();
        assert_eq!(history, vec![report]);
        assert!(fx.bus.committed(GROUP).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_redelivered_report_is_idempotent() {
        let fx = Fixture::new();
        let ts = Utc.with_ymd_and_hms(2021, 2, 14, 10, 27, 0).unwrap();
        let report = MonitorReport::reachable(4, ts, 503, false, 2.5);
        fx.bus.publish(&report).await.unwrap();
        fx.bus.publish(&report).await.unwrap();

        let mut agent = fx.agent();
        agent.process_next().await.unwrap();
        agent.process_next().await.unwrap();

        assert_eq!(fx.store.get_site_reports(4).unwrap().len(), 1);
        let status = fx.store.get_site_status(4).unwrap().unwrap();
        assert_eq!(status.status_code, Some(503));
        assert_eq!(status.content_valid, Some(false));
    }

    #[tokio::test]
    async fn test_reports_applied_in_order() {
        let fx = Fixture::new();
        let first = Utc.with_ymd_and_hms(2021, 2, 14, 10, 27, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2021, 2, 14, 10, 28, 0).unwrap();
        fx.bus
            .publish(&MonitorReport::reachable(1, first, 200, true, 0.1))
            .await
            .unwrap();
        fx.bus.publish(&MonitorReport::unreachable(1, second)).await.unwrap();

        let mut agent = fx.agent();
        agent.process_next().await.unwrap();
        agent.process_next().await.unwrap();

        let status = fx.store.get_site_status(1).unwrap().unwrap();
        assert!(!status.reachable);
        assert_eq!(status.last_update, second);
        assert_eq!(fx.store.get_site_reports(1).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_committed() {
        let fx = Fixture::new();
        let ts = Utc.with_ymd_and_hms(2021, 2, 14, 10, 27, 0).unwrap();
        fx.bus
            .publish(&MonitorReport::reachable(2, ts, 200, true, 0.4))
            .await
            .unwrap();

        fx.store.execute_batch("DROP TABLE site_reports").unwrap();

        let mut agent = fx.agent();
        let result = agent.process_next().await;
        assert!(matches!(result, Err(AgentError::Db(_))));
        assert_eq!(fx.bus.committed(GROUP).unwrap(), 0);
        // Both writes rolled back together.
        assert!(fx.store.get_site_status(2).unwrap().is_none());

        // Once the store is back, a restarted agent picks the report up again.
        fx.store
            .execute_batch(
                "CREATE TABLE site_reports (
                    site_id INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    reachable BOOLEAN NOT NULL,
                    status_code INTEGER,
                    content_valid BOOLEAN,
                    latency REAL,
                    UNIQUE (site_id, timestamp)
                )",
            )
            .unwrap();
        let mut restarted = fx.agent();
        restarted.process_next().await.unwrap();
        assert_eq!(fx.store.get_site_reports(2).unwrap().len(), 1);
        assert!(fx.store.get_site_status(2).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let fx = Fixture::new();
        let ts = Utc.with_ymd_and_hms(2021, 2, 14, 10, 27, 0).unwrap();
        let mut broken = MonitorReport::unreachable(3, ts);
        broken.latency_seconds = Some(1.0);
        fx.bus.publish(&broken).await.unwrap();
        fx.bus.publish(&MonitorReport::unreachable(3, ts)).await.unwrap();

        let mut agent = fx.agent();
        agent.process_next().await.unwrap();
        assert!(fx.store.get_site_status(3).unwrap().is_none());
        assert!(fx.bus.committed(GROUP).unwrap() > 0);

        agent.process_next().await.unwrap();
        let status = fx.store.get_site_status(3).unwrap().unwrap();
        assert!(!status.reachable);
    }

    #[tokio::test]
    async fn test_run_stops_on_store_failure() {
        let fx = Fixture::new();
        let ts = Utc.with_ymd_and_hms(2021, 2, 14, 10, 27, 0).unwrap();
        fx.bus
            .publish(&MonitorReport::reachable(6, ts, 200, true, 0.2))
            .await
            .unwrap();
        fx.store.execute_batch("DROP TABLE site_status").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), fx.agent().run())
            .await
            .unwrap();
        assert!(matches!(result, Err(AgentError::Db(_))));
    }
}
