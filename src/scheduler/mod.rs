//! Scheduler module for running site scans.
//!
//! The [`Scanner`] probes a batch of sites with bounded concurrency and
//! publishes one report per site. The [`ScanLoop`] repeats that forever.

use crate::bus::ReportPublisher;
use crate::probe::{probe_site, Fetcher};
use crate::registry::SiteDescriptor;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of probes allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 100;

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),
}

/// Probes sites and publishes their reports.
pub struct Scanner {
    fetcher: Arc<dyn Fetcher>,
    publisher: Arc<dyn ReportPublisher>,
    /// One permit per probe allowed in flight.
    limiter: Arc<Semaphore>,
}

impl Scanner {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        publisher: Arc<dyn ReportPublisher>,
        max_concurrent_checks: usize,
    ) -> Result<Self, SchedulerError> {
        if max_concurrent_checks < 1 {
            return Err(SchedulerError::InvalidConcurrency(max_concurrent_checks));
        }
        Ok(Self {
            fetcher,
            publisher,
            limiter: Arc::new(Semaphore::new(max_concurrent_checks)),
        })
    }

    /// Probe every site once and wait until all of them are done.
    ///
    /// Sites run as independent tasks; a failure in one of them never
    /// affects the others or the batch as a whole.
    pub async fn scan(&self, sites: &[SiteDescriptor]) {
        let mut tasks = JoinSet::new();

        for site in sites {
            let site = site.clone();
            let fetcher = self.fetcher.clone();
            let publisher = self.publisher.clone();
            let limiter = self.limiter.clone();

            tasks.spawn(async move {
                let permit = match limiter.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::error!("Concurrency limiter closed, skipping site {}", site.id);
                        return;
                    }
                };

                let report = probe_site(fetcher.as_ref(), &site).await;
                drop(permit);

                if let Err(e) = publisher.publish(&report).await {
                    tracing::error!("Failed to publish report for site {}: {}", site.id, e);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Scan task failed: {}", e);
            }
        }
    }
}

/// Runs the scanner over a fixed site list, pausing between cycles.
pub struct ScanLoop {
    scanner: Scanner,
    sites: Vec<SiteDescriptor>,
    interval: Duration,
}

impl ScanLoop {
    pub fn new(scanner: Scanner, sites: Vec<SiteDescriptor>, interval: Duration) -> Self {
        Self {
            scanner,
            sites,
            interval,
        }
    }

    /// Scan, sleep, repeat. Only returns when the process is torn down.
    pub async fn run(&self) {
        tracing::info!(
            "Starting scan loop with {} sites every {:?}",
            self.sites.len(),
            self.interval
        );

        loop {
            self.scanner.scan(&self.sites).await;
            tracing::debug!("Scan cycle complete, sleeping {:?}", self.interval);
            tokio::time::sleep(self.interval).await;
        }
    }
}
