//! Configuration module for sitemon.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The resulting value is built once at startup and handed to each component.

use crate::scheduler::DEFAULT_MAX_CONCURRENT_CHECKS;

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0}")]
    Constraint(String),
}

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database holding sites and results (default: "sitemon.db")
    pub db_path: String,
    /// Path to the SQLite file backing the report log (default: "sitemon-bus.db")
    pub bus_path: String,
    /// Topic the reports are published on (default: "monitor_reports")
    pub topic: String,
    /// Consumer group used by the ingestion agent (default: "sitemon-ingest")
    pub consumer_group: String,
    /// Delay between the end of one scan cycle and the start of the next (default: 60s)
    pub scan_interval: Duration,
    /// Maximum number of probes in flight at once (default: 100)
    pub max_concurrent_checks: usize,
    /// Timeout applied to every HTTP probe (default: 10s)
    pub request_timeout: Duration,
    /// How long the consumer sleeps when the log has nothing new (default: 500ms)
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "sitemon.db".to_string(),
            bus_path: "sitemon-bus.db".to_string(),
            topic: "monitor_reports".to_string(),
            consumer_group: "sitemon-ingest".to_string(),
            scan_interval: Duration::from_secs(60),
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEMON_DB_PATH`: Database file path (default: "sitemon.db")
    /// - `SITEMON_BUS_PATH`: Report log file path (default: "sitemon-bus.db")
    /// - `SITEMON_TOPIC`: Report topic (default: "monitor_reports")
    /// - `SITEMON_CONSUMER_GROUP`: Ingestion consumer group (default: "sitemon-ingest")
    /// - `SITEMON_SCAN_INTERVAL`: Seconds between scans (default: 60)
    /// - `SITEMON_MAX_CONCURRENT_CHECKS`: Probe concurrency limit (default: 100)
    /// - `SITEMON_REQUEST_TIMEOUT`: Probe timeout in seconds (default: 10)
    /// - `SITEMON_POLL_INTERVAL_MS`: Consumer idle poll delay (default: 500)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(path) = lookup("SITEMON_DB_PATH") {
            cfg.db_path = path;
        }
        if let Some(path) = lookup("SITEMON_BUS_PATH") {
            cfg.bus_path = path;
        }
        if let Some(topic) = lookup("SITEMON_TOPIC") {
            cfg.topic = topic;
        }
        if let Some(group) = lookup("SITEMON_CONSUMER_GROUP") {
            cfg.consumer_group = group;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SITEMON_SCAN_INTERVAL")? {
            cfg.scan_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_var(&lookup, "SITEMON_MAX_CONCURRENT_CHECKS")? {
            cfg.max_concurrent_checks = limit;
        }
        if let Some(secs) = parse_var::<f64, _>(&lookup, "SITEMON_REQUEST_TIMEOUT")? {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::Invalid {
                    key: "SITEMON_REQUEST_TIMEOUT",
                    value: secs.to_string(),
                });
            }
            cfg.request_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SITEMON_POLL_INTERVAL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the constraints every component relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_checks < 1 {
            return Err(ConfigError::Constraint(
                "max_concurrent_checks must be at least 1".to_string(),
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(ConfigError::Constraint(
                "scan_interval must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Constraint(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("db_path", &self.db_path),
            ("bus_path", &self.bus_path),
            ("topic", &self.topic),
            ("consumer_group", &self.consumer_group),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Constraint(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
