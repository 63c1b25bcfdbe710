//! Demonstration of a scripted reading session.
//!
//! This example shows how to:
//! 1. Configure a tracker with a fast heartbeat for demo purposes
//! 2. Record a page view with content metadata
//! 3. Accumulate engaged time while the reader stays active
//! 4. Track an embedded video alongside the page
//! 5. Shut down and flush everything still queued
//!
//! Run with: cargo run --example reading_session
//!
//! Events are printed to stdout as JSON, one per line, as each dispatch
//! flush runs. Run it twice: the visitor_uuid carries over between runs.

use std::thread;
use std::time::Duration;

use dwell_tracker::{DwellTracker, Metadata, StdoutTransport, TrackerConfig};
use serde_json::Map;

fn main() {
    println!("Dwell Tracker - Reading Session Demo");
    println!("====================================");
    println!();

    // A 3 s heartbeat and a 5 s flush keep the demo lively; production
    // setups usually leave both at their defaults.
    let mut config = TrackerConfig::new("reading-demo");
    config.seconds_between_heartbeats = Some(3);
    config.flush_interval = Duration::from_secs(5);

    println!("Site ID: {}", config.site_id);
    println!("Heartbeat interval: {}ms", config.base_interval_ms());
    println!();

    let mut tracker = DwellTracker::new(config, Box::new(StdoutTransport));

    let url = "https://example.com/articles/how-we-read";
    let referrer = "https://example.com/";
    let metadata = Metadata {
        title: Some("How We Read".to_string()),
        authors: Some(vec!["Alex Reader".to_string()]),
        section: Some("culture".to_string()),
        page_type: Some("post".to_string()),
        ..Metadata::default()
    };

    println!("Opening the article...");
    tracker.track_page_view(url, referrer, Some(metadata), Map::new());
    tracker.start_engagement(url, referrer, Map::new());

    println!("Reading for 7 seconds (watch for heartbeat events)...");
    thread::sleep(Duration::from_secs(7));

    println!("Starting the embedded video...");
    tracker.track_play(url, referrer, "teaser-1", Some(60_000), None, Map::new());
    thread::sleep(Duration::from_secs(4));

    println!("Pausing the video, still reading...");
    tracker.track_pause(url, "teaser-1");
    thread::sleep(Duration::from_secs(2));

    println!("Closing the tab...");
    tracker.stop_engagement();
    tracker.shutdown();

    println!();
    println!("Demo complete!");
}
