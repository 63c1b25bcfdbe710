//! Integration tests for the full tracking pipeline: trackers feeding
//! the recorder, identity stamping, queueing, and batched dispatch.

use dwell_tracker::{
    Action, BatchPayload, Dispatcher, DwellTracker, EngagedTimeTracker, Event, EventQueue,
    EventRecorder, Metadata, TrackerConfig, Transport, TransportError, VideoTracker,
};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct CapturingTransport {
    batches: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl CapturingTransport {
    fn events(&self) -> Vec<Value> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

impl Transport for CapturingTransport {
    fn deliver(&mut self, batch: &BatchPayload) -> Result<(), TransportError> {
        self.batches.lock().unwrap().push(batch.events.clone());
        Ok(())
    }
}

fn test_config() -> TrackerConfig {
    let mut config = TrackerConfig::new("integration-site");
    // No identity file and no timer-driven flushes: deliveries in these
    // tests come from explicit shutdown flushes only.
    config.visitor_store = None;
    config.flush_interval = Duration::from_secs(3_600);
    config
}

#[test]
fn test_engagement_pipeline_stamps_identity_end_to_end() {
    let config = test_config();
    let queue = EventQueue::new();
    let recorder = Arc::new(EventRecorder::new(&config, queue.clone()));
    let engagement =
        EngagedTimeTracker::unscheduled(Arc::clone(&recorder), config.base_interval_ms());

    let url = "https://example.com/post";
    let referrer = "https://news.example.com";
    recorder.record(Event::new(Action::Pageview, url).with_referrer(referrer));

    let start = Instant::now();
    engagement.start_interaction(url, referrer, Map::new());

    // Tick a little past the 2 s mark so registration latency cannot
    // push the credited window under two whole seconds.
    engagement
        .sampler()
        .sample_tick_at(start + Duration::from_millis(2_500));
    engagement.sampler().send_heartbeats(None);

    // The window was reset by the sweep, so ending the interaction has
    // nothing left to flush.
    engagement.end_interaction();

    let transport = CapturingTransport::default();
    let mut dispatcher = Dispatcher::start(queue.clone(), Box::new(transport.clone()), &config);
    dispatcher.stop();

    let events = transport.events();
    assert_eq!(events.len(), 2, "expected pageview + one heartbeat");

    let pageview = &events[0];
    assert_eq!(pageview["action"], "pageview");
    assert_eq!(pageview["idsite"], "integration-site");
    assert_eq!(pageview["url"], url);
    assert_eq!(pageview["urlref"], referrer);
    assert!(pageview["data"]["ts"].is_i64());

    let heartbeat = &events[1];
    assert_eq!(heartbeat["action"], "heartbeat");
    assert_eq!(heartbeat["inc"].as_u64(), Some(2));
    let total = heartbeat["tt"].as_u64().unwrap();
    assert!((2_000..=2_500).contains(&total), "total was {total}");

    // Both events belong to the same session and the same visitor.
    assert_eq!(pageview["sid"].as_u64(), Some(1));
    assert_eq!(heartbeat["sid"].as_u64(), Some(1));
    assert_eq!(pageview["surl"], url);
    assert_eq!(pageview["slts"].as_i64(), Some(0));

    let visitor = pageview["data"]["visitor_uuid"].as_str().unwrap();
    assert_eq!(visitor.len(), 36);
    assert_eq!(heartbeat["data"]["visitor_uuid"].as_str(), Some(visitor));

    assert!(queue.is_empty());
}

#[test]
fn test_video_pipeline_tightens_interval_and_emits_heartbeats() {
    let config = test_config();
    let queue = EventQueue::new();
    let recorder = Arc::new(EventRecorder::new(&config, queue.clone()));
    let video = VideoTracker::unscheduled(Arc::clone(&recorder), config.base_interval_ms());

    let url = "https://example.com/post";
    let metadata = Metadata {
        title: Some("Intro".to_string()),
        duration_secs: Some(2),
        ..Metadata::default()
    };

    let start = Instant::now();
    video.track_play(url, "", "clip-1", Some(2_000), Some(metadata), Map::new());

    // A 2 s video derives a 400 ms completion timeout, which pulls the
    // sampling pace down from the page default.
    assert_eq!(video.sampler().current_interval_ms(), 400);

    video
        .sampler()
        .sample_tick_at(start + Duration::from_millis(1_500));
    video.sampler().send_heartbeats(None);

    let transport = CapturingTransport::default();
    let mut dispatcher = Dispatcher::start(queue.clone(), Box::new(transport.clone()), &config);
    dispatcher.stop();

    let events = transport.events();
    assert_eq!(events.len(), 2, "expected videostart + one vheartbeat");

    let started = &events[0];
    assert_eq!(started["action"], "videostart");
    assert_eq!(started["metadata"]["title"], "Intro");

    let heartbeat = &events[1];
    assert_eq!(heartbeat["action"], "vheartbeat");
    assert_eq!(heartbeat["inc"].as_u64(), Some(1));
    let total = heartbeat["tt"].as_u64().unwrap();
    assert!((1_000..=1_500).contains(&total), "total was {total}");
    assert_eq!(heartbeat["sid"].as_u64(), Some(1));
}

#[test]
fn test_tracker_facade_flushes_final_heartbeat_on_shutdown() {
    let transport = CapturingTransport::default();
    let mut tracker = DwellTracker::new(test_config(), Box::new(transport.clone()));

    let url = "https://example.com/live";
    tracker.track_page_view(url, "", None, Map::new());
    tracker.start_engagement(url, "", Map::new());

    // Let the background sample loop credit a couple of seconds of
    // engaged time, then shut down before any scheduled sweep.
    thread::sleep(Duration::from_millis(2_200));
    tracker.shutdown();

    let events = transport.events();
    assert!(
        events.len() >= 2,
        "expected pageview plus a final heartbeat, got {events:?}"
    );
    assert_eq!(events[0]["action"], "pageview");

    let heartbeat = events
        .iter()
        .find(|event| event["action"] == "heartbeat")
        .expect("no heartbeat delivered");
    assert!(heartbeat["inc"].as_u64().unwrap() >= 1);
    assert!(heartbeat["tt"].as_u64().unwrap() >= 1_000);

    assert_eq!(tracker.queue_len(), 0);
}
