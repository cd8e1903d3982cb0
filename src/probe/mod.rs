//! Probe module for site monitoring.
//!
//! A probe fetches a site's test URL, measures how long that took and
//! checks the body against the site's content pattern.

mod http;

pub use http::*;

use crate::db::MonitorReport;
use crate::registry::SiteDescriptor;
use crate::timing::timed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

/// Something that can GET a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ProbeError>;
}

/// What happened when a site was fetched.
#[derive(Debug)]
pub enum ProbeOutcome {
    Responded { latency: f64, page: FetchedPage },
    Failed(ProbeError),
}

/// Fetch a URL and time it. Transport errors become a `Failed` outcome.
pub async fn run_probe(fetcher: &dyn Fetcher, url: &str) -> ProbeOutcome {
    match timed(|| fetcher.fetch(url)).await {
        (latency, Ok(page)) => ProbeOutcome::Responded { latency, page },
        (_, Err(e)) => ProbeOutcome::Failed(e),
    }
}

/// Whether a body satisfies the pattern. No pattern means valid.
pub fn content_matches(pattern: Option<&Regex>, body: &str) -> bool {
    pattern.map_or(true, |re| re.is_match(body))
}

/// Turn a probe outcome into the report published for the site.
pub fn build_report(
    site: &SiteDescriptor,
    timestamp: DateTime<Utc>,
    outcome: ProbeOutcome,
) -> MonitorReport {
    match outcome {
        ProbeOutcome::Responded { latency, page } => {
            tracing::info!(
                "Check for site {} completed in {:.3}s ({})",
                site.id,
                latency,
                page.status
            );
            let valid = content_matches(site.content_pattern.as_ref(), &page.body);
            MonitorReport::reachable(site.id, timestamp, page.status, valid, latency)
        }
        ProbeOutcome::Failed(e) => {
            tracing::warn!("Error connecting to site {}: {}", site.id, e);
            MonitorReport::unreachable(site.id, timestamp)
        }
    }
}

/// Probe a single site and produce its report.
pub async fn probe_site(fetcher: &dyn Fetcher, site: &SiteDescriptor) -> MonitorReport {
    tracing::info!(
        "Starting check for site {} ({}): {}",
        site.id,
        site.name,
        site.test_url
    );
    let timestamp = Utc::now();
    let outcome = run_probe(fetcher, &site.test_url).await;
    build_report(site, timestamp, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFetcher {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedPage, ProbeError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(FetchedPage {
                status: self.status,
                body: self.body.to_string(),
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, ProbeError> {
            Err(ProbeError::Network(format!("dns error for {}", url)))
        }
    }

    fn site(pattern: Option<&str>) -> SiteDescriptor {
        SiteDescriptor::new(
            0,
            "test",
            "https://example.com",
            pattern.map(|p| Regex::new(p).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_reachable_without_pattern() {
        let fetcher = StaticFetcher { status: 200, body: "<html>hello</html>" };
        let report = probe_site(&fetcher, &site(None)).await;

        assert!(report.reachable);
        assert_eq!(report.status_code, Some(200));
        assert_eq!(report.content_valid, Some(true));
        assert!(report.latency_seconds.unwrap() > 0.0);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_non_success_status_is_still_reachable() {
        let fetcher = StaticFetcher { status: 404, body: "not found" };
        let report = probe_site(&fetcher, &site(None)).await;

        assert!(report.reachable);
        assert_eq!(report.status_code, Some(404));
        assert_eq!(report.content_valid, Some(true));
    }

    #[tokio::test]
    async fn test_pattern_match_and_mismatch() {
        let google = StaticFetcher { status: 200, body: "<title>Google</title>" };
        let report = probe_site(&google, &site(Some("Google"))).await;
        assert_eq!(report.content_valid, Some(true));

        let other = StaticFetcher { status: 200, body: "<title>Microsoft</title>" };
        let report = probe_site(&other, &site(Some("Google"))).await;
        assert!(report.reachable);
        assert_eq!(report.content_valid, Some(false));
    }

    #[tokio::test]
    async fn test_failure_becomes_unreachable_report() {
        let before = Utc::now();
        let report = probe_site(&FailingFetcher, &site(Some("Google"))).await;

        assert!(!report.reachable);
        assert_eq!(report.status_code, None);
        assert_eq!(report.content_valid, None);
        assert_eq!(report.latency_seconds, None);
        assert!(report.timestamp >= before);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_content_matches_is_a_search() {
        let re = Regex::new("Google").unwrap();
        assert!(content_matches(Some(&re), "Search with Google today"));
        assert!(!content_matches(Some(&re), "google"));
        assert!(content_matches(None, ""));
    }
}
