//! Top-level tracker facade.
//!
//! Wires the queue, recorder, both engagement trackers, and the
//! dispatcher into one explicitly-configured object. Nothing here is
//! global: an application can run several trackers side by side, each
//! with its own site id and transport.

use crate::config::TrackerConfig;
use crate::dispatcher::{Dispatcher, Transport};
use crate::engagement::EngagedTimeTracker;
use crate::event::{Action, Event, Metadata};
use crate::queue::EventQueue;
use crate::recorder::EventRecorder;
use crate::video::VideoTracker;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Client-side engagement tracker: pageviews, engaged time, and video
/// watch time, delivered in batches through a pluggable transport.
pub struct DwellTracker {
    queue: EventQueue<Event>,
    recorder: Arc<EventRecorder>,
    engagement: EngagedTimeTracker,
    video: VideoTracker,
    // Declared last: the dispatcher must outlive the trackers that
    // feed the queue, so its shutdown flush sees their final events.
    dispatcher: Dispatcher,
}

impl DwellTracker {
    /// Create a tracker and start its dispatch loop.
    ///
    /// Sampler timers arm themselves lazily with the first tracked
    /// page or video.
    pub fn new(config: TrackerConfig, transport: Box<dyn Transport>) -> Self {
        let queue = EventQueue::new();
        let recorder = Arc::new(EventRecorder::new(&config, queue.clone()));
        let base_interval_ms = config.base_interval_ms();
        let engagement = EngagedTimeTracker::new(Arc::clone(&recorder), base_interval_ms);
        let video = VideoTracker::new(Arc::clone(&recorder), base_interval_ms);
        let dispatcher = Dispatcher::start(queue.clone(), transport, &config);

        tracing::info!(site_id = %config.site_id, "tracker started");
        Self {
            queue,
            recorder,
            engagement,
            video,
            dispatcher,
        }
    }

    /// Record that a page was opened.
    pub fn track_page_view(
        &self,
        url: &str,
        referrer: &str,
        metadata: Option<Metadata>,
        extra_data: Map<String, Value>,
    ) {
        let mut event = Event::new(Action::Pageview, url)
            .with_referrer(referrer)
            .with_extra_data(extra_data);
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }
        self.recorder.record(event);
    }

    /// Begin measuring engaged time on a page, ending any engagement
    /// already in progress.
    pub fn start_engagement(&self, url: &str, referrer: &str, extra_data: Map<String, Value>) {
        self.engagement.start_interaction(url, referrer, extra_data);
    }

    /// Stop measuring engaged time, flushing the final heartbeat.
    pub fn stop_engagement(&self) {
        self.engagement.end_interaction();
    }

    /// Report that a video is playing.
    pub fn track_play(
        &self,
        url: &str,
        referrer: &str,
        video_id: &str,
        duration_ms: Option<u64>,
        metadata: Option<Metadata>,
        extra_data: Map<String, Value>,
    ) {
        self.video
            .track_play(url, referrer, video_id, duration_ms, metadata, extra_data);
    }

    /// Report that a video was paused.
    pub fn track_pause(&self, url: &str, video_id: &str) {
        self.video.track_pause(url, video_id);
    }

    /// Forget a video; its next play counts as a fresh start.
    pub fn reset_video(&self, url: &str, video_id: &str) {
        self.video.reset(url, video_id);
    }

    /// Number of events waiting for the next dispatch.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop sampling and deliver everything still queued. Idempotent;
    /// also runs on drop.
    pub fn shutdown(&mut self) {
        tracing::info!("shutting down tracker");
        self.engagement.end_interaction();
        self.engagement.stop();
        self.video.stop();
        self.dispatcher.stop();
    }
}

impl Drop for DwellTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
