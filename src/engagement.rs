//! Engaged-time tracking for pages.
//!
//! One interaction is active at a time: starting a new page ends the
//! previous one, flushing its final heartbeat. While the engaged flag
//! is set the sampler credits wall time to the page's key, and every
//! sweep that finds accumulated time records a `heartbeat` event
//! through the recorder.

use crate::event::{Action, Event};
use crate::recorder::EventRecorder;
use crate::sampler::{Accumulates, HeartbeatArgs, SampleArgs, Sampler};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Per-key event arguments captured when the interaction starts.
#[derive(Debug, Clone, Default)]
struct KeyArgs {
    referrer: String,
    extra_data: Map<String, Value>,
}

/// Sampler callbacks for engaged-time tracking.
#[derive(Clone)]
pub struct EngagementHooks {
    engaged: Arc<AtomicBool>,
    keys: Arc<Mutex<HashMap<String, KeyArgs>>>,
    recorder: Arc<EventRecorder>,
}

impl Accumulates for EngagementHooks {
    fn sample(&self, _args: &SampleArgs<'_>) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    fn heartbeat(&self, args: &HeartbeatArgs<'_>) {
        let stored = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(args.key)
            .cloned();
        let stored = match stored {
            Some(stored) => stored,
            // The key was forgotten between sweep and emission.
            None => return,
        };

        let event = Event::new(Action::Heartbeat, args.key)
            .with_referrer(stored.referrer)
            .with_extra_data(stored.extra_data)
            .with_heartbeat(args.total_ms, args.rounded_seconds);
        self.recorder.record(event);
    }

    fn track_key(&self, key: &str, _duration_ms: Option<u64>) {
        // Keys normally arrive with their arguments already stored;
        // give stragglers an empty entry so their heartbeats still go
        // out.
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default();
    }
}

/// Measures how long a visitor actively engages with a page.
pub struct EngagedTimeTracker {
    hooks: EngagementHooks,
    sampler: Sampler<EngagementHooks>,
}

impl EngagedTimeTracker {
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

    fn hooks(recorder: Arc<EventRecorder>) -> EngagementHooks {
        EngagementHooks {
            engaged: Arc::new(AtomicBool::new(false)),
            keys: Arc::new(Mutex::new(HashMap::new())),
            recorder,
        }
    }

    /// Begin measuring engagement on `url`, ending any interaction
    /// already in progress.
    pub fn start_interaction(&self, url: &str, referrer: &str, extra_data: Map<String, Value>) {
        self.end_interaction();

        tracing::debug!(url, "starting interaction");
        self.hooks
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                url.to_string(),
                KeyArgs {
                    referrer: referrer.to_string(),
                    extra_data,
                },
            );
        self.hooks.engaged.store(true, Ordering::SeqCst);
        self.sampler.track_key(url, None);
    }

    /// Stop measuring, flushing a final heartbeat for any engaged time
    /// not yet reported. Harmless when nothing is in progress.
    pub fn end_interaction(&self) {
        self.hooks.engaged.store(false, Ordering::SeqCst);

        for key in self.sampler.tracked_keys() {
            self.sampler.send_heartbeat(&key, None);
            self.sampler.drop_key(&key);
            self.hooks
                .keys
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }

    /// Whether an interaction is currently being measured.
    pub fn is_engaged(&self) -> bool {
        self.hooks.engaged.load(Ordering::SeqCst)
    }

    /// The sampler driving this tracker, for embedders running their
    /// own tick loop.
    pub fn sampler(&self) -> &Sampler<EngagementHooks> {
        &self.sampler
    }

    /// Stop the background timers.
    pub fn stop(&self) {
        self.sampler.stop();
    }
}
