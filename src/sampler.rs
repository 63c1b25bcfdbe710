//! Adaptive heartbeat scheduling across tracked keys.
//!
//! The sampler keeps one [`Accumulator`] per tracked key and runs two
//! cadences: a fast sampling tick that asks the callbacks whether time
//! currently counts for each key, and a slower sweep that turns
//! accumulated time into heartbeat callbacks. The sweep interval adapts
//! to the shortest content being tracked, so each 20% completion
//! checkpoint of even a very short video gets its own heartbeat.
//!
//! Timers start with the first tracked key and are plain threads woken
//! through a channel timeout, which doubles as the shutdown signal. A
//! sampler built with [`Sampler::unscheduled`] never starts them;
//! embedders and tests drive the tick and sweep entry points directly.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Cadence of the engagement sampling tick, in milliseconds.
pub const SAMPLE_RATE_MS: u64 = 100;

/// Timing state for one tracked key.
#[derive(Debug, Clone)]
pub struct Accumulator {
    /// Engaged time since the last heartbeat, in milliseconds
    pub ms_since_heartbeat: u64,
    /// Engaged time over the key's whole lifetime, in milliseconds
    pub total_ms: u64,
    /// When the key was last visited by a sampling tick
    pub last_sample_time: Instant,
    /// Heartbeat timeout derived from the content duration, fixed at
    /// track time
    pub heartbeat_timeout_ms: u64,
}

/// Arguments for one sampling decision.
#[derive(Debug, Clone, Copy)]
pub struct SampleArgs<'a> {
    /// Key being sampled
    pub key: &'a str,
}

/// Arguments for one heartbeat emission.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatArgs<'a> {
    /// Key the heartbeat reports on
    pub key: &'a str,
    /// Whole engaged seconds accumulated since the previous heartbeat
    pub rounded_seconds: u64,
    /// Total engaged milliseconds for the key so far
    pub total_ms: u64,
}

/// Callbacks through which the sampler drives a concrete tracker.
///
/// Implementations are shared with the sampler's timer threads, so any
/// mutable state lives behind interior mutability.
pub trait Accumulates {
    /// Whether time since the last tick counts for `key` right now.
    fn sample(&self, args: &SampleArgs<'_>) -> bool;

    /// Record a heartbeat. Called only when the drift guard passes.
    fn heartbeat(&self, args: &HeartbeatArgs<'_>);

    /// Notification that `key` has entered the registry, with the
    /// content duration it was tracked under.
    fn track_key(&self, key: &str, duration_ms: Option<u64>);
}

/// Derive the heartbeat timeout in ms for content of a known length.
///
/// Content is measured in fifths: a heartbeat should be observable for
/// each 20% completion checkpoint. Short content gets a custom interval
/// of one fifth of its duration; mid-length content gets half the base
/// interval; anything longer, or of unknown length, uses the base
/// interval as-is. A degenerate fifth of 0 ms falls back to the base so
/// the timeout stays positive.
pub fn timeout_from_duration(base_interval_ms: u64, duration_ms: Option<u64>) -> u64 {
    if let Some(duration_ms) = duration_ms {
        let completion_interval = duration_ms / 5;
        if completion_interval == 0 {
            return base_interval_ms;
        }
        if completion_interval < base_interval_ms / 2 {
            return completion_interval;
        }
        if completion_interval < base_interval_ms {
            return base_interval_ms / 2;
        }
    }
    base_interval_ms
}

struct SamplerState {
    accumulators: HashMap<String, Accumulator>,
    /// Current sweep interval: min(base, shortest tracked timeout)
    current_interval_ms: u64,
}

struct SamplerCore<C> {
    callbacks: C,
    base_interval_ms: u64,
    state: Mutex<SamplerState>,
}

impl<C: Accumulates> SamplerCore<C> {
    fn state(&self) -> MutexGuard<'_, SamplerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_interval_ms(&self) -> u64 {
        self.state().current_interval_ms
    }

    /// Register `key` if it is new. Returns true when an accumulator
    /// was inserted.
    fn track_key(&self, key: &str, duration_ms: Option<u64>, now: Instant) -> bool {
        let mut state = self.state();
        if state.accumulators.contains_key(key) {
            return false;
        }

        let heartbeat_timeout_ms = timeout_from_duration(self.base_interval_ms, duration_ms);
        state.accumulators.insert(
            key.to_string(),
            Accumulator {
                ms_since_heartbeat: 0,
                total_ms: 0,
                last_sample_time: now,
                heartbeat_timeout_ms,
            },
        );
        state.current_interval_ms = state.current_interval_ms.min(heartbeat_timeout_ms);
        tracing::debug!(key, timeout_ms = heartbeat_timeout_ms, "tracking key");
        true
    }

    fn drop_key(&self, key: &str) {
        let mut state = self.state();
        if state.accumulators.remove(key).is_some() {
            tracing::debug!(key, "dropped key");
        }
        state.current_interval_ms = state
            .accumulators
            .values()
            .map(|acc| acc.heartbeat_timeout_ms)
            .min()
            .unwrap_or(self.base_interval_ms)
            .min(self.base_interval_ms);
    }

    /// One sampling pass: ask the callbacks which keys are live, then
    /// credit elapsed time to those that are.
    ///
    /// Callbacks run without the registry lock held. A key dropped
    /// between the snapshot and the apply phase is skipped.
    fn sample_tick(&self, now: Instant) {
        let keys: Vec<String> = self.state().accumulators.keys().cloned().collect();

        let decisions: Vec<(String, bool)> = keys
            .into_iter()
            .map(|key| {
                let counts = self.callbacks.sample(&SampleArgs { key: &key });
                (key, counts)
            })
            .collect();

        let mut state = self.state();
        for (key, counts) in decisions {
            if let Some(acc) = state.accumulators.get_mut(&key) {
                if counts {
                    let elapsed_ms = now.duration_since(acc.last_sample_time).as_millis() as u64;
                    acc.ms_since_heartbeat += elapsed_ms;
                    acc.total_ms += elapsed_ms;
                }
                acc.last_sample_time = now;
            }
        }
    }

    /// One sweep pass: heartbeat every key whose accumulated time has
    /// reached its send threshold.
    ///
    /// The threshold is the key's timeout minus the current sweep
    /// interval, so a heartbeat goes out in the window right before
    /// each timeout rather than one sweep after it. For the shortest
    /// tracked key the threshold is zero and any accumulated time is
    /// sent as soon as possible.
    fn send_heartbeats(&self, forced_secs: Option<u64>) {
        let due: Vec<String> = {
            let state = self.state();
            let interval = state.current_interval_ms;
            state
                .accumulators
                .iter()
                .filter(|(_, acc)| {
                    acc.ms_since_heartbeat >= acc.heartbeat_timeout_ms.saturating_sub(interval)
                })
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in due {
            self.send_heartbeat(&key, forced_secs);
        }
    }

    /// Emit one heartbeat for `key` and reset its accumulation window.
    ///
    /// The increment defaults to the whole seconds accumulated since
    /// the last heartbeat; `forced_secs` overrides it. The callback
    /// fires only when the increment is positive and within a quarter
    /// second of the base interval (clock drift tolerance); the window
    /// resets either way, discarding any oversized remainder. A key
    /// that is no longer tracked is ignored.
    fn send_heartbeat(&self, key: &str, forced_secs: Option<u64>) {
        let snapshot = self
            .state()
            .accumulators
            .get(key)
            .map(|acc| (acc.ms_since_heartbeat, acc.total_ms));
        let (ms_since_heartbeat, total_ms) = match snapshot {
            Some(snapshot) => snapshot,
            None => return,
        };

        let inc_secs = forced_secs.unwrap_or(ms_since_heartbeat / 1000);
        let tolerance_secs = (self.base_interval_ms / 1000) as f64 + 0.25;
        if inc_secs > 0 && inc_secs as f64 <= tolerance_secs {
            tracing::debug!(key, inc_secs, total_ms, "sending heartbeat");
            self.callbacks.heartbeat(&HeartbeatArgs {
                key,
                rounded_seconds: inc_secs,
                total_ms,
            });
        }

        if let Some(acc) = self.state().accumulators.get_mut(key) {
            acc.ms_since_heartbeat = 0;
        }
    }
}

struct TimerControl {
    // Dropping the sender wakes both timer threads immediately.
    stop_tx: Sender<()>,
    sample_handle: JoinHandle<()>,
    heartbeat_handle: JoinHandle<()>,
}

/// Multi-key heartbeat scheduler.
///
/// Generic over the [`Accumulates`] callbacks so engagement and video
/// tracking share one scheduling core without it knowing either.
pub struct Sampler<C> {
    core: Arc<SamplerCore<C>>,
    scheduled: bool,
    started: AtomicBool,
    control: Mutex<Option<TimerControl>>,
}

impl<C> Sampler<C>
where
    C: Accumulates + Send + Sync + 'static,
{
    /// Create a sampler whose timers arm themselves with the first
    /// tracked key.
    ///
    /// `base_interval_ms` is the slowest heartbeat pace; pass
    /// [`TrackerConfig::base_interval_ms`](crate::config::TrackerConfig::base_interval_ms)
    /// to honor the configured override range.
    pub fn new(callbacks: C, base_interval_ms: u64) -> Self {
        Self::build(callbacks, base_interval_ms, true)
    }

    /// Create a sampler that never starts background timers.
    ///
    /// Ticks and sweeps happen only when the embedder calls
    /// [`sample_tick`](Self::sample_tick) and
    /// [`send_heartbeats`](Self::send_heartbeats) itself.
    pub fn unscheduled(callbacks: C, base_interval_ms: u64) -> Self {
        Self::build(callbacks, base_interval_ms, false)
    }

    fn build(callbacks: C, base_interval_ms: u64, scheduled: bool) -> Self {
        Self {
            core: Arc::new(SamplerCore {
                callbacks,
                base_interval_ms,
                state: Mutex::new(SamplerState {
                    accumulators: HashMap::new(),
                    current_interval_ms: base_interval_ms,
                }),
            }),
            scheduled,
            started: AtomicBool::new(false),
            control: Mutex::new(None),
        }
    }

    /// Start tracking `key`, deriving its heartbeat timeout from the
    /// content duration. Tracking an already-tracked key changes
    /// nothing.
    ///
    /// The first key ever tracked arms the sampling and sweep timers;
    /// they keep running until [`stop`](Self::stop) or drop.
    pub fn track_key(&self, key: &str, duration_ms: Option<u64>) {
        self.track_key_at(key, duration_ms, Instant::now());
    }

    /// Clock-injected variant of [`track_key`](Self::track_key).
    pub fn track_key_at(&self, key: &str, duration_ms: Option<u64>, now: Instant) {
        if self.core.track_key(key, duration_ms, now) {
            self.core.callbacks.track_key(key, duration_ms);
        }
        if self.scheduled && !self.started.swap(true, Ordering::SeqCst) {
            self.start_timers();
        }
    }

    /// Forget `key` immediately. Safe to call while a sweep is in
    /// flight; the sweep's snapshot may still deliver one last
    /// heartbeat for it.
    pub fn drop_key(&self, key: &str) {
        self.core.drop_key(key);
    }

    /// Run one sampling pass against the current clock.
    pub fn sample_tick(&self) {
        self.core.sample_tick(Instant::now());
    }

    /// Clock-injected variant of [`sample_tick`](Self::sample_tick).
    pub fn sample_tick_at(&self, now: Instant) {
        self.core.sample_tick(now);
    }

    /// Run one sweep, heartbeating every key past its send threshold.
    /// `forced_secs` overrides the increment of every heartbeat sent.
    pub fn send_heartbeats(&self, forced_secs: Option<u64>) {
        self.core.send_heartbeats(forced_secs);
    }

    /// Emit a heartbeat for one key, resetting its accumulation window.
    pub fn send_heartbeat(&self, key: &str, forced_secs: Option<u64>) {
        self.core.send_heartbeat(key, forced_secs);
    }

    /// The base heartbeat interval this sampler was built with.
    pub fn base_interval_ms(&self) -> u64 {
        self.core.base_interval_ms
    }

    /// The current sweep interval: the base interval or the shortest
    /// tracked timeout, whichever is smaller.
    pub fn current_interval_ms(&self) -> u64 {
        self.core.current_interval_ms()
    }

    /// Whether `key` is currently tracked.
    pub fn is_tracking(&self, key: &str) -> bool {
        self.core.state().accumulators.contains_key(key)
    }

    /// Keys currently tracked, in no particular order.
    pub fn tracked_keys(&self) -> Vec<String> {
        self.core.state().accumulators.keys().cloned().collect()
    }

    /// Snapshot of the accumulator for `key`, if tracked.
    pub fn accumulator(&self, key: &str) -> Option<Accumulator> {
        self.core.state().accumulators.get(key).cloned()
    }

    /// Stop the timer threads and wait for them to finish. Idempotent;
    /// also runs on drop.
    pub fn stop(&self) {
        self.shutdown_timers();
    }

    fn start_timers(&self) {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let core = Arc::clone(&self.core);
        let sample_rx = stop_rx.clone();
        let sample_handle = thread::spawn(move || loop {
            match sample_rx.recv_timeout(Duration::from_millis(SAMPLE_RATE_MS)) {
                Err(RecvTimeoutError::Timeout) => core.sample_tick(Instant::now()),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        let core = Arc::clone(&self.core);
        let heartbeat_handle = thread::spawn(move || loop {
            // Re-read the interval every round so a newly tracked short
            // key tightens the pace from the next sweep on.
            let interval = core.current_interval_ms();
            match stop_rx.recv_timeout(Duration::from_millis(interval)) {
                Err(RecvTimeoutError::Timeout) => core.send_heartbeats(None),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        let control = TimerControl {
            stop_tx,
            sample_handle,
            heartbeat_handle,
        };
        *self.control.lock().unwrap_or_else(PoisonError::into_inner) = Some(control);
        tracing::debug!("sampler timers started");
    }
}

impl<C> Sampler<C> {
    fn shutdown_timers(&self) {
        let control = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(control) = control {
            drop(control.stop_tx);
            let _ = control.sample_handle.join();
            let _ = control.heartbeat_handle.join();
            tracing::debug!("sampler timers stopped");
        }
    }
}

impl<C> Drop for Sampler<C> {
    fn drop(&mut self) {
        self.shutdown_timers();
    }
}
