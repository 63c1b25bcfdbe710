//! Session tracking with a rolling inactivity window.
//!
//! A session groups events that occur without a 30-minute gap between
//! them. Every lookup extends the window, so a visitor who keeps
//! generating activity stays in one session indefinitely.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gap of inactivity after which a new session begins.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Identity of one visit, stamped onto every event recorded during it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Monotonically increasing session counter, starting at 1
    pub id: u64,
    /// URL that started the session
    pub url: String,
    /// External referrer that led to the session, if any
    pub referrer: String,
    /// Session start, in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Start of the previous session, or 0 when this is the first
    pub last_session_timestamp_ms: i64,
}

/// Hands out the current session, minting a new one after inactivity.
#[derive(Debug)]
pub struct SessionManager {
    timeout_ms: i64,
    next_id: u64,
    current: Option<ActiveSession>,
}

#[derive(Debug)]
struct ActiveSession {
    info: SessionInfo,
    expires_ms: i64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create a manager with the standard 30-minute window.
    pub fn new() -> Self {
        Self::with_timeout(SESSION_TIMEOUT)
    }

    /// Create a manager with a custom inactivity window.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as i64,
            next_id: 0,
            current: None,
        }
    }

    /// Return the live session, extending its window, or mint a new one.
    pub fn get(&mut self, url: &str, referrer: &str) -> SessionInfo {
        self.get_at(url, referrer, Utc::now().timestamp_millis())
    }

    /// Clock-injected variant of [`get`](Self::get).
    pub fn get_at(&mut self, url: &str, referrer: &str, now_ms: i64) -> SessionInfo {
        if let Some(active) = self.current.as_mut() {
            if now_ms < active.expires_ms {
                active.expires_ms = now_ms + self.timeout_ms;
                return active.info.clone();
            }
        }

        let last_session_timestamp_ms = self
            .current
            .take()
            .map(|expired| expired.info.timestamp_ms)
            .unwrap_or(0);
        self.next_id += 1;

        let info = SessionInfo {
            id: self.next_id,
            url: url.to_string(),
            referrer: referrer.to_string(),
            timestamp_ms: now_ms,
            last_session_timestamp_ms,
        };
        tracing::debug!(session = info.id, "started new session");
        self.current = Some(ActiveSession {
            info: info.clone(),
            expires_ms: now_ms + self.timeout_ms,
        });
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: i64 = 60 * 1000;

    #[test]
    fn test_first_lookup_starts_session_one() {
        let mut sessions = SessionManager::new();
        let info = sessions.get_at("http://example.com/story", "http://example.com", 0);

        assert_eq!(info.id, 1);
        assert_eq!(info.url, "http://example.com/story");
        assert_eq!(info.referrer, "http://example.com");
        assert_eq!(info.timestamp_ms, 0);
        assert_eq!(info.last_session_timestamp_ms, 0);
    }

    #[test]
    fn test_lookup_within_window_reuses_session() {
        let mut sessions = SessionManager::new();
        let first = sessions.get_at("http://example.com/story", "", 0);
        let second = sessions.get_at("http://example.com/other", "", 29 * MINUTE_MS);

        assert_eq!(second, first);
    }

    #[test]
    fn test_gap_past_window_starts_new_session() {
        let mut sessions = SessionManager::new();
        let first = sessions.get_at("http://example.com/story", "", 1_000);
        let second = sessions.get_at("http://example.com/return", "", 1_000 + 31 * MINUTE_MS);

        assert_eq!(second.id, 2);
        assert_eq!(second.url, "http://example.com/return");
        assert_eq!(second.last_session_timestamp_ms, first.timestamp_ms);
    }

    #[test]
    fn test_activity_keeps_extending_the_window() {
        let mut sessions = SessionManager::new();
        let first = sessions.get_at("http://example.com/story", "", 0);

        // Touch every 20 minutes; no single gap reaches 30.
        let mut now = 0;
        for _ in 0..6 {
            now += 20 * MINUTE_MS;
            let info = sessions.get_at("http://example.com/story", "", now);
            assert_eq!(info.id, first.id);
        }
    }
}
