//! Dwell Tracker CLI
//!
//! Synthetic engagement sessions for exercising the pipeline end to end.

use chrono::Utc;
use clap::{Parser, Subcommand};
use dwell_tracker::{DwellTracker, Metadata, StdoutTransport, TrackerConfig, Transport, VERSION};
use serde_json::Map;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "http")]
use dwell_tracker::BlockingHttpTransport;

#[derive(Parser)]
#[command(name = "dwell")]
#[command(version = VERSION)]
#[command(about = "Client-side engagement analytics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic engagement session
    Simulate {
        /// Site identifier stamped onto every event
        #[arg(long, default_value = "demo-site")]
        site_id: String,

        /// Page URL the session engages with
        #[arg(long, default_value = "https://example.com/articles/dwell-time")]
        url: String,

        /// Referrer for the page view
        #[arg(long, default_value = "")]
        referrer: String,

        /// Seconds between heartbeats (accepted range 1-15)
        #[arg(long)]
        heartbeat_secs: Option<u64>,

        /// Seconds between dispatch flushes
        #[arg(long, default_value = "5")]
        flush_secs: u64,

        /// Also simulate a playing video on the page
        #[arg(long)]
        video: bool,

        /// Stop after this many seconds (0 = run until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,

        /// POST batches to this endpoint instead of stdout (requires http feature)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Show configuration
    Config {
        /// Write the effective values to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Simulate {
            site_id,
            url,
            referrer,
            heartbeat_secs,
            flush_secs,
            video,
            duration,
            endpoint,
        } => {
            cmd_simulate(
                site_id,
                &url,
                &referrer,
                heartbeat_secs,
                flush_secs,
                video,
                duration,
                endpoint,
            );
        }
        Commands::Config { init } => {
            cmd_config(init);
        }
    }
}

fn cmd_simulate(
    site_id: String,
    url: &str,
    referrer: &str,
    heartbeat_secs: Option<u64>,
    flush_secs: u64,
    video: bool,
    duration: u64,
    endpoint: Option<String>,
) {
    println!("Dwell Tracker v{VERSION}");
    println!();

    let mut config = TrackerConfig::load().unwrap_or_default();
    config.site_id = site_id;
    if heartbeat_secs.is_some() {
        config.seconds_between_heartbeats = heartbeat_secs;
    }
    config.flush_interval = Duration::from_secs(flush_secs.max(1));
    if endpoint.is_some() {
        config.endpoint = endpoint;
    }

    println!("Simulating engagement on {url}");
    println!("  Site ID: {}", config.site_id);
    println!("  Heartbeat interval: {}ms", config.base_interval_ms());
    println!("  Flush interval: {}s", config.flush_interval.as_secs());

    let transport = make_transport(&config);
    let mut tracker = DwellTracker::new(config, transport);

    tracker.track_page_view(url, referrer, Some(article_metadata()), Map::new());
    tracker.start_engagement(url, referrer, Map::new());

    if video {
        tracker.track_play(url, referrer, "intro-clip", Some(90_000), None, Map::new());
        println!("  Video: playing (intro-clip, 90s)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc_handler(r);

    let started = Instant::now();
    let mut last_status = Instant::now();

    while running.load(Ordering::SeqCst) {
        if duration > 0 && started.elapsed() >= Duration::from_secs(duration) {
            break;
        }

        if last_status.elapsed() >= Duration::from_secs(10) {
            println!(
                "[{}] engaged for {}s, {} events queued",
                Utc::now().format("%H:%M:%S"),
                started.elapsed().as_secs(),
                tracker.queue_len()
            );
            last_status = Instant::now();
        }

        thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping tracker...");
    tracker.shutdown();
    println!("Session finished after {}s", started.elapsed().as_secs());
}

fn cmd_config(init: bool) {
    let config = TrackerConfig::load().unwrap_or_default();

    if init {
        if let Err(e) = config.save() {
            eprintln!("Error saving config: {e}");
            std::process::exit(1);
        }
        println!("Wrote {:?}", TrackerConfig::config_path());
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", TrackerConfig::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Pick the transport for the session from the effective configuration.
#[cfg(feature = "http")]
fn make_transport(config: &TrackerConfig) -> Box<dyn Transport> {
    match &config.endpoint {
        Some(endpoint) => match BlockingHttpTransport::new(endpoint.clone()) {
            Ok(transport) => {
                println!("  Transport: {endpoint}");
                Box::new(transport)
            }
            Err(e) => {
                eprintln!("Warning: HTTP transport initialization failed: {e}");
                eprintln!("Continuing with stdout transport.");
                Box::new(StdoutTransport)
            }
        },
        None => {
            println!("  Transport: stdout");
            Box::new(StdoutTransport)
        }
    }
}

#[cfg(not(feature = "http"))]
fn make_transport(config: &TrackerConfig) -> Box<dyn Transport> {
    if config.endpoint.is_some() {
        eprintln!("Warning: endpoint ignored (http feature not enabled at compile time)");
    }
    println!("  Transport: stdout");
    Box::new(StdoutTransport)
}

fn article_metadata() -> Metadata {
    Metadata {
        title: Some("Measuring Dwell Time".to_string()),
        section: Some("engineering".to_string()),
        page_type: Some("post".to_string()),
        ..Metadata::default()
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}

/// Set up log output; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dwell_tracker=info")),
        )
        .init();
}
