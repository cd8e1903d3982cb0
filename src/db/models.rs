//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A site definition as stored in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub test_url: String,
    /// Uncompiled content pattern, if any.
    pub regex: Option<String>,
    pub enabled: bool,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            test_url: String::new(),
            regex: None,
            enabled: true,
        }
    }
}

/// The outcome of probing one site at one point in time.
///
/// When `reachable` is false the three optional fields are `None`;
/// when it is true they are all populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub site_id: i64,
    /// When the probe started.
    pub timestamp: DateTime<Utc>,
    pub reachable: bool,
    pub status_code: Option<u16>,
    pub content_valid: Option<bool>,
    pub latency_seconds: Option<f64>,
}

impl MonitorReport {
    /// Report for a site that answered.
    pub fn reachable(
        site_id: i64,
        timestamp: DateTime<Utc>,
        status_code: u16,
        content_valid: bool,
        latency_seconds: f64,
    ) -> Self {
        Self {
            site_id,
            timestamp,
            reachable: true,
            status_code: Some(status_code),
            content_valid: Some(content_valid),
            latency_seconds: Some(latency_seconds),
        }
    }

    /// Report for a site whose request failed at the transport level.
    pub fn unreachable(site_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            site_id,
            timestamp,
            reachable: false,
            status_code: None,
            content_valid: None,
            latency_seconds: None,
        }
    }

    /// Whether the optional fields agree with `reachable`.
    pub fn is_consistent(&self) -> bool {
        let populated = [
            self.status_code.is_some(),
            self.content_valid.is_some(),
            self.latency_seconds.is_some(),
        ];
        if self.reachable {
            populated.iter().all(|p| *p)
        } else {
            populated.iter().all(|p| !*p)
        }
    }
}

/// Latest known state of a site, one row per site.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteStatus {
    pub site_id: i64,
    pub reachable: bool,
    pub status_code: Option<u16>,
    pub content_valid: Option<bool>,
    pub latency: Option<f64>,
    pub last_update: DateTime<Utc>,
}
