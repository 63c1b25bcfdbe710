//! Dwell Tracker - client-side engagement analytics.
//!
//! This library measures how long visitors actually engage with pages
//! and videos, reporting the time as periodic heartbeat events next to
//! plain pageviews. Events are batched in-process and delivered to a
//! collector endpoint on a fixed cadence.
//!
//! The heart of the crate is the [`Sampler`]: a multi-key scheduler
//! that samples engagement every 100 ms and adapts its heartbeat pace
//! to the shortest content being tracked, so even a 2-second clip gets
//! a heartbeat for each fifth of its length.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DwellTracker                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Trackers   │──▶│   Sampler   │──▶│  Recorder   │       │
//! │  │ (page/video)│   │ (heartbeat) │   │ (identity)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                             │              │
//! │                                             ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │  Transport  │◀────────────────────│ EventQueue  │       │
//! │  │ (batch POST)│      Dispatcher     │   (FIFO)    │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dwell_tracker::{DwellTracker, StdoutTransport, TrackerConfig};
//!
//! let config = TrackerConfig::new("example.com");
//! let mut tracker = DwellTracker::new(config, Box::new(StdoutTransport));
//!
//! tracker.track_page_view(
//!     "http://example.com/story",
//!     "http://example.com",
//!     None,
//!     Default::default(),
//! );
//! tracker.start_engagement("http://example.com/story", "http://example.com", Default::default());
//! // ... the visitor reads ...
//! tracker.stop_engagement();
//! tracker.shutdown();
//! ```

pub mod config;
pub mod dispatcher;
pub mod engagement;
pub mod event;
pub mod queue;
pub mod recorder;
pub mod sampler;
pub mod session;
pub mod tracker;
pub mod video;
pub mod visitor;

// Re-export key types at crate root for convenience
pub use config::{ConfigError, TrackerConfig, DEFAULT_BASE_INTERVAL_MS};
pub use dispatcher::{BatchPayload, Dispatcher, StdoutTransport, Transport, TransportError};
pub use engagement::EngagedTimeTracker;
pub use event::{Action, Event, HeartbeatData, Metadata};
pub use queue::EventQueue;
pub use recorder::EventRecorder;
pub use sampler::{
    timeout_from_duration, Accumulates, Accumulator, HeartbeatArgs, SampleArgs, Sampler,
    SAMPLE_RATE_MS,
};
pub use session::{SessionInfo, SessionManager};
pub use tracker::DwellTracker;
pub use video::VideoTracker;
pub use visitor::{VisitorInfo, VisitorManager};

// HTTP transport re-exports (when enabled)
#[cfg(feature = "http")]
pub use dispatcher::{BlockingHttpTransport, HttpTransport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
