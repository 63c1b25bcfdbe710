//! Watch-time tracking for videos.
//!
//! Unlike page engagement, several videos can accumulate time at once,
//! so the playing flag lives per key rather than on the tracker. A key
//! combines the page url and the video id; the first play of a video
//! records a single `videostart`, and accumulated watch time goes out
//! as `vheartbeat` events. The video's duration drives the sampler's
//! adaptive timeout, so short clips heartbeat often enough to catch
//! every completion checkpoint.

use crate::event::{Action, Event, Metadata};
use crate::recorder::EventRecorder;
use crate::sampler::{Accumulates, HeartbeatArgs, SampleArgs, Sampler};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// State for one video under observation.
#[derive(Debug, Clone, Default)]
struct TrackedVideo {
    url: String,
    referrer: String,
    metadata: Option<Metadata>,
    extra_data: Map<String, Value>,
    playing: bool,
    /// Whether `videostart` has been recorded for this video
    started: bool,
}

/// Sampler callbacks for watch-time tracking.
#[derive(Clone)]
pub struct VideoHooks {
    videos: Arc<Mutex<HashMap<String, TrackedVideo>>>,
    recorder: Arc<EventRecorder>,
}

impl VideoHooks {
    fn videos(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedVideo>> {
        self.videos.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Accumulates for VideoHooks {
    fn sample(&self, args: &SampleArgs<'_>) -> bool {
        self.videos()
            .get(args.key)
            .map(|video| video.playing)
            .unwrap_or(false)
    }

    fn heartbeat(&self, args: &HeartbeatArgs<'_>) {
        let video = match self.videos().get(args.key).cloned() {
            Some(video) => video,
            None => return,
        };

        let mut event = Event::new(Action::VideoHeartbeat, video.url)
            .with_referrer(video.referrer)
            .with_extra_data(video.extra_data)
            .with_heartbeat(args.total_ms, args.rounded_seconds);
        if let Some(metadata) = video.metadata {
            event = event.with_metadata(metadata);
        }
        self.recorder.record(event);
    }

    fn track_key(&self, key: &str, _duration_ms: Option<u64>) {
        // track_play stores the full state before the key reaches the
        // sampler; a straggler gets a paused placeholder whose url is
        // recovered from the key.
        self.videos().entry(key.to_string()).or_insert_with(|| {
            let url = key.rsplit_once("::").map(|(url, _)| url).unwrap_or(key);
            TrackedVideo {
                url: url.to_string(),
                ..TrackedVideo::default()
            }
        });
    }
}

/// Measures how long visitors watch each video.
pub struct VideoTracker {
    hooks: VideoHooks,
    sampler: Sampler<VideoHooks>,
}

impl VideoTracker {
    /// Create a tracker with background timers.
    pub fn new(recorder: Arc<EventRecorder>, base_interval_ms: u64) -> Self {
        let hooks = Self::hooks(recorder);
        let sampler = Sampler::new(hooks.clone(), base_interval_ms);
        Self { hooks, sampler }
    }

    /// Create a tracker whose sampler is driven by the caller.
    pub fn unscheduled(recorder: Arc<EventRecorder>, base_interval_ms: u64) -> Self {
        let hooks = Self::hooks(recorder);
        let sampler = Sampler::unscheduled(hooks.clone(), base_interval_ms);
        Self { hooks, sampler }
    }

    fn hooks(recorder: Arc<EventRecorder>) -> VideoHooks {
        VideoHooks {
            videos: Arc::new(Mutex::new(HashMap::new())),
            recorder,
        }
    }

    fn key(url: &str, video_id: &str) -> String {
        format!("{url}::{video_id}")
    }

    /// Report that a video is playing.
    ///
    /// The first play of a video records one `videostart`; resuming
    /// after a pause does not repeat it. The supplied arguments replace
    /// whatever was stored for the video, and `duration_ms` sets the
    /// heartbeat pace for the key.
    pub fn track_play(
        &self,
        url: &str,
        referrer: &str,
        video_id: &str,
        duration_ms: Option<u64>,
        metadata: Option<Metadata>,
        extra_data: Map<String, Value>,
    ) {
        let key = Self::key(url, video_id);

        let start_event = {
            let mut videos = self.hooks.videos();
            let video = videos.entry(key.clone()).or_default();
            video.url = url.to_string();
            video.referrer = referrer.to_string();
            video.metadata = metadata;
            video.extra_data = extra_data;
            video.playing = true;

            if video.started {
                None
            } else {
                video.started = true;
                tracing::debug!(url, video_id, "video started");
                let mut event = Event::new(Action::VideoStart, url)
                    .with_referrer(video.referrer.clone())
                    .with_extra_data(video.extra_data.clone());
                if let Some(metadata) = video.metadata.clone() {
                    event = event.with_metadata(metadata);
                }
                Some(event)
            }
        };

        if let Some(event) = start_event {
            self.hooks.recorder.record(event);
        }
        self.sampler.track_key(&key, duration_ms);
    }

    /// Report that a video was paused. The key stays tracked so watch
    /// time resumes seamlessly on the next play.
    pub fn track_pause(&self, url: &str, video_id: &str) {
        let key = Self::key(url, video_id);
        if let Some(video) = self.hooks.videos().get_mut(&key) {
            video.playing = false;
        }
    }

    /// Forget a video entirely. The next play counts as a fresh start.
    pub fn reset(&self, url: &str, video_id: &str) {
        let key = Self::key(url, video_id);
        self.hooks.videos().remove(&key);
        self.sampler.drop_key(&key);
    }

    /// Whether the video is currently marked as playing.
    pub fn is_playing(&self, url: &str, video_id: &str) -> bool {
        let key = Self::key(url, video_id);
        self.hooks
            .videos()
            .get(&key)
            .map(|video| video.playing)
            .unwrap_or(false)
    }

    /// The sampler driving this tracker, for embedders running their
    /// own tick loop.
    pub fn sampler(&self) -> &Sampler<VideoHooks> {
        &self.sampler
    }

    /// Stop the background timers.
    pub fn stop(&self) {
        self.sampler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TrackerConfig, DEFAULT_BASE_INTERVAL_MS};
    use crate::queue::EventQueue;
    use std::time::{Duration, Instant};

    fn tracker() -> (VideoTracker, EventQueue<Event>) {
        let mut config = TrackerConfig::new("example.com");
        config.visitor_store = None;
        let queue = EventQueue::new();
        let recorder = Arc::new(EventRecorder::new(&config, queue.clone()));
        let tracker = VideoTracker::unscheduled(recorder, DEFAULT_BASE_INTERVAL_MS);
        (tracker, queue)
    }

    fn meta(title: &str) -> Option<Metadata> {
        Some(Metadata {
            title: Some(title.to_string()),
            ..Metadata::default()
        })
    }

    #[test]
    fn test_first_play_records_videostart_once() {
        let (tracker, queue) = tracker();

        tracker.track_play(
            "http://example.com/story",
            "http://example.com",
            "vid-1",
            Some(90_000),
            meta("Launch"),
            Map::new(),
        );

        let event = queue.pop().unwrap();
        assert_eq!(event.action, Action::VideoStart);
        assert_eq!(event.url, "http://example.com/story");
        assert_eq!(event.metadata.unwrap().title.as_deref(), Some("Launch"));

        // Pausing and resuming must not produce another start.
        tracker.track_pause("http://example.com/story", "vid-1");
        tracker.track_play(
            "http://example.com/story",
            "http://example.com",
            "vid-1",
            Some(90_000),
            meta("Launch"),
            Map::new(),
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_watch_time_goes_out_as_vheartbeats() {
        let (tracker, queue) = tracker();
        let start = Instant::now();

        tracker.track_play(
            "http://example.com/story",
            "",
            "vid-1",
            Some(90_000),
            meta("Launch"),
            Map::new(),
        );
        queue.pop(); // videostart

        // Tick a little past the 2 s mark: the key was registered a
        // moment after `start`, so a tick at exactly +2 s could round
        // down.
        tracker
            .sampler()
            .sample_tick_at(start + Duration::from_millis(2_500));
        tracker.sampler().send_heartbeats(None);

        let event = queue.pop().unwrap();
        assert_eq!(event.action, Action::VideoHeartbeat);
        assert_eq!(event.url, "http://example.com/story");
        let heartbeat = event.heartbeat.unwrap();
        assert_eq!(heartbeat.engaged_secs, 2);
        assert!(event.metadata.is_some());
    }

    #[test]
    fn test_pause_stops_the_clock_but_keeps_the_key() {
        let (tracker, queue) = tracker();
        let start = Instant::now();
        let key = "http://example.com/story::vid-1";

        tracker.track_play("http://example.com/story", "", "vid-1", None, None, Map::new());
        queue.pop(); // videostart

        tracker
            .sampler()
            .sample_tick_at(start + Duration::from_millis(1_500));
        let watched = tracker.sampler().accumulator(key).unwrap().ms_since_heartbeat;
        assert!(watched > 0);

        tracker.track_pause("http://example.com/story", "vid-1");
        assert!(!tracker.is_playing("http://example.com/story", "vid-1"));

        // Paused time passes but does not count.
        tracker
            .sampler()
            .sample_tick_at(start + Duration::from_secs(6));
        assert_eq!(
            tracker.sampler().accumulator(key).unwrap().ms_since_heartbeat,
            watched
        );
        assert!(tracker.sampler().is_tracking(key));

        tracker.track_play("http://example.com/story", "", "vid-1", None, None, Map::new());
        tracker
            .sampler()
            .sample_tick_at(start + Duration::from_millis(7_500));
        assert_eq!(
            tracker.sampler().accumulator(key).unwrap().ms_since_heartbeat,
            watched + 1_500
        );
    }

    #[test]
    fn test_short_video_tightens_the_sweep_interval() {
        let (tracker, _queue) = tracker();

        tracker.track_play("http://example.com/story", "", "clip", Some(2_000), None, Map::new());

        assert_eq!(tracker.sampler().current_interval_ms(), 400);
    }

    #[test]
    fn test_videos_accumulate_independently() {
        let (tracker, queue) = tracker();
        let start = Instant::now();

        tracker.track_play("http://example.com/story", "", "vid-1", None, None, Map::new());
        tracker.track_play("http://example.com/story", "", "vid-2", None, None, Map::new());
        tracker.track_pause("http://example.com/story", "vid-2");
        queue.drain(0); // both videostarts

        tracker
            .sampler()
            .sample_tick_at(start + Duration::from_secs(3));

        let playing = tracker
            .sampler()
            .accumulator("http://example.com/story::vid-1")
            .unwrap();
        let paused = tracker
            .sampler()
            .accumulator("http://example.com/story::vid-2")
            .unwrap();
        assert!(playing.total_ms >= 2_000);
        assert_eq!(paused.total_ms, 0);
    }

    #[test]
    fn test_reset_forgets_the_video() {
        let (tracker, queue) = tracker();
        let key = "http://example.com/story::vid-1";

        tracker.track_play("http://example.com/story", "", "vid-1", None, None, Map::new());
        queue.pop(); // videostart

        tracker.reset("http://example.com/story", "vid-1");
        assert!(!tracker.sampler().is_tracking(key));
        assert!(!tracker.is_playing("http://example.com/story", "vid-1"));

        // After a reset the same video is new again.
        tracker.track_play("http://example.com/story", "", "vid-1", None, None, Map::new());
        assert_eq!(queue.pop().unwrap().action, Action::VideoStart);
    }
}
