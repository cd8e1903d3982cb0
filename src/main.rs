//! sitemon - Website availability monitoring.
//!
//! A monitor process probes the registered sites and publishes one report per
//! site onto a durable log; a separate ingestion process stores those reports.

mod agent;
mod bus;
mod config;
mod db;
mod probe;
mod registry;
mod scheduler;
mod timing;

use agent::IngestionAgent;
use bus::{ReportPublisher, SqliteBus};
use config::Config;
use db::{MonitorReport, Site, Store};
use probe::HttpFetcher;
use scheduler::{ScanLoop, Scanner};

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sitemon")]
#[command(about = "Website availability monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe all enabled sites forever, publishing a report per site each cycle
    Monitor,
    /// Probe all enabled sites once and exit
    Scan,
    /// Consume published reports and store them
    Ingest,
    /// Publish a sample report for site 1
    TestData,
    /// Show the current status and report history of a site
    Status {
        /// Site id
        site_id: i64,
    },
    /// Register a site to monitor
    AddSite {
        /// Human-readable label
        #[arg(short, long)]
        name: String,
        /// URL fetched on every probe
        #[arg(short, long)]
        url: String,
        /// Pattern the response body must contain
        #[arg(short, long)]
        regex: Option<String>,
        /// Register the site without monitoring it
        #[arg(long)]
        disabled: bool,
    },
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitemon=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let cfg = Config::load()?;
    tracing::info!("Using database at {}", cfg.db_path);

    match cli.command {
        Commands::Monitor => {
            let scanner = build_scanner(&cfg)?;
            let store = Store::new(&cfg.db_path)?;
            let sites = registry::load_sites(&store)?;
            ScanLoop::new(scanner, sites, cfg.scan_interval).run().await;
        }
        Commands::Scan => {
            let scanner = build_scanner(&cfg)?;
            let store = Store::new(&cfg.db_path)?;
            let sites = registry::load_sites(&store)?;
            scanner.scan(&sites).await;
            tracing::info!("Scanned {} sites", sites.len());
        }
        Commands::Ingest => {
            let store = Store::new(&cfg.db_path)?;
            let bus = SqliteBus::open(&cfg.bus_path, &cfg.topic)?;
            let consumer = bus.consumer(&cfg.consumer_group, cfg.poll_interval)?;
            IngestionAgent::new(store, consumer).run().await?;
        }
        Commands::TestData => {
            let bus = SqliteBus::open(&cfg.bus_path, &cfg.topic)?;
            let report = MonitorReport::reachable(1, chrono::Utc::now(), 200, true, 0.1);
            bus.publish(&report).await?;
            tracing::info!("Published sample report: {:?}", report);
        }
        Commands::Status { site_id } => {
            let store = Store::new(&cfg.db_path)?;
            match store.get_site_status(site_id)? {
                Some(status) => println!(
                    "site {}: reachable={} status={:?} content_valid={:?} latency={:?} last_update={}",
                    status.site_id,
                    status.reachable,
                    status.status_code,
                    status.content_valid,
                    status.latency,
                    status.last_update
                ),
                None => println!("site {}: no status recorded", site_id),
            }
            for report in store.get_site_reports(site_id)? {
                println!(
                    "  {} reachable={} status={:?} content_valid={:?} latency={:?}",
                    report.timestamp,
                    report.reachable,
                    report.status_code,
                    report.content_valid,
                    report.latency_seconds
                );
            }
        }
        Commands::AddSite {
            name,
            url,
            regex,
            disabled,
        } => {
            let store = Store::new(&cfg.db_path)?;
            let mut site = Site {
                name,
                test_url: url,
                regex,
                enabled: !disabled,
                ..Default::default()
            };
            let id = store.add_site(&mut site)?;
            tracing::info!("Added site {} ({}) with id {}", site.name, site.test_url, id);
        }
    }

    Ok(())
}

/// Wire the HTTP fetcher and the report log into a scanner.
fn build_scanner(cfg: &Config) -> Result<Scanner, BoxError> {
    let fetcher = HttpFetcher::new(cfg.request_timeout)?;
    let bus = SqliteBus::open(&cfg.bus_path, &cfg.topic)?;
    let scanner = Scanner::new(Arc::new(fetcher), Arc::new(bus), cfg.max_concurrent_checks)?;
    Ok(scanner)
}
