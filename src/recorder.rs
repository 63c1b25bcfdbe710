//! Late-binding pipeline stage between trackers and the queue.
//!
//! Trackers build events knowing only the page; the recorder stamps on
//! everything contextual (site id, session descriptor, visitor id) and
//! hands the finished event to the shared queue. Recording also counts
//! as activity: it extends both the session window and the visitor
//! expiry.

use crate::config::TrackerConfig;
use crate::event::Event;
use crate::queue::EventQueue;
use crate::session::SessionManager;
use crate::visitor::VisitorManager;
use std::sync::{Mutex, PoisonError};

/// Stamps identity onto events and enqueues them.
pub struct EventRecorder {
    site_id: String,
    queue: EventQueue<Event>,
    sessions: Mutex<SessionManager>,
    visitors: Mutex<VisitorManager>,
}

impl EventRecorder {
    /// Create a recorder feeding `queue`, with the visitor store taken
    /// from the configuration.
    pub fn new(config: &TrackerConfig, queue: EventQueue<Event>) -> Self {
        let visitors = match &config.visitor_store {
            Some(path) => VisitorManager::with_store(path.clone()),
            None => VisitorManager::new(),
        };
        Self {
            site_id: config.site_id.clone(),
            queue,
            sessions: Mutex::new(SessionManager::new()),
            visitors: Mutex::new(visitors),
        }
    }

    /// Stamp `event` with site, session, and visitor identity, then
    /// push it onto the queue.
    pub fn record(&self, mut event: Event) {
        event.site_id = self.site_id.clone();

        let session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.url, &event.referrer);
        event.set_session_info(session);

        let visitor = self
            .visitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend();
        event.set_visitor_info(&visitor);

        tracing::debug!(action = %event.action, url = %event.url, "recorded event");
        self.queue.push(event);
    }

    /// The queue this recorder feeds.
    pub fn queue(&self) -> &EventQueue<Event> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    fn recorder() -> (EventRecorder, EventQueue<Event>) {
        let mut config = TrackerConfig::new("example.com");
        config.visitor_store = None;
        let queue = EventQueue::new();
        (EventRecorder::new(&config, queue.clone()), queue)
    }

    #[test]
    fn test_recording_stamps_identity_and_enqueues() {
        let (recorder, queue) = recorder();

        recorder.record(
            Event::new(Action::Pageview, "http://example.com/story")
                .with_referrer("http://example.com"),
        );

        let event = queue.pop().unwrap();
        assert_eq!(event.site_id, "example.com");
        let session = event.session.expect("session stamped");
        assert_eq!(session.id, 1);
        assert_eq!(session.url, "http://example.com/story");
        assert!(event.visitor_id.is_some());
    }

    #[test]
    fn test_consecutive_events_share_session_and_visitor() {
        let (recorder, queue) = recorder();

        recorder.record(Event::new(Action::Pageview, "http://example.com/a"));
        recorder.record(Event::new(Action::Heartbeat, "http://example.com/a"));

        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert_eq!(first.session, second.session);
        assert_eq!(first.visitor_id, second.visitor_id);
    }
}
