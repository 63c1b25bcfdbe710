//! Long-lived visitor identity.
//!
//! A visitor is a random UUID with a 13-month shelf life, optionally
//! persisted to disk so the identity survives restarts. Activity can
//! push the expiry out, so only a visitor absent for 13 months gets a
//! new id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifetime of a visitor id: 13 average-length months, in seconds.
pub const VISITOR_LIFETIME_SECS: i64 = (60 * 60 * 24 * 365 / 12) * 13;

/// Durable identity for one device or profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorInfo {
    /// Random UUID, stable until the visitor expires
    pub id: String,
    /// Expiry, in milliseconds since the Unix epoch
    pub expires_ms: i64,
}

/// Hands out the visitor id, minting a fresh one after expiry.
#[derive(Debug, Default)]
pub struct VisitorManager {
    store: Option<PathBuf>,
    current: Option<VisitorInfo>,
}

impl VisitorManager {
    /// Create a manager that keeps the visitor in memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager that persists the visitor as JSON at `path`.
    ///
    /// A previously stored visitor is picked up if the file parses;
    /// otherwise the manager starts empty and overwrites the file on
    /// the next change.
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = Self::load(&path);
        Self {
            store: Some(path),
            current,
        }
    }

    /// Current visitor, minting a new id when none is live.
    pub fn get(&mut self) -> VisitorInfo {
        self.get_at(Utc::now().timestamp_millis())
    }

    /// Current visitor with the expiry pushed another 13 months out.
    pub fn extend(&mut self) -> VisitorInfo {
        self.extend_at(Utc::now().timestamp_millis())
    }

    /// Clock-injected variant of [`get`](Self::get).
    pub fn get_at(&mut self, now_ms: i64) -> VisitorInfo {
        match self.current.as_ref() {
            Some(info) if now_ms < info.expires_ms => info.clone(),
            _ => self.mint(now_ms),
        }
    }

    /// Clock-injected variant of [`extend`](Self::extend).
    pub fn extend_at(&mut self, now_ms: i64) -> VisitorInfo {
        match self.current.as_mut() {
            Some(info) if now_ms < info.expires_ms => {
                info.expires_ms = now_ms + VISITOR_LIFETIME_SECS * 1000;
                let info = info.clone();
                self.persist();
                info
            }
            _ => self.mint(now_ms),
        }
    }

    fn mint(&mut self, now_ms: i64) -> VisitorInfo {
        let info = VisitorInfo {
            id: Uuid::new_v4().to_string(),
            expires_ms: now_ms + VISITOR_LIFETIME_SECS * 1000,
        };
        tracing::debug!(visitor = %info.id, "minted new visitor id");
        self.current = Some(info.clone());
        self.persist();
        info
    }

    fn load(path: &Path) -> Option<VisitorInfo> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!("ignoring unreadable visitor store: {e}");
                None
            }
        }
    }

    // Identity storage is best-effort: losing it costs continuity, not
    // correctness, so failures are logged and swallowed.
    fn persist(&self) {
        let (path, info) = match (self.store.as_ref(), self.current.as_ref()) {
            (Some(path), Some(info)) => (path, info),
            _ => return,
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = serde_json::to_string_pretty(info)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!("failed to persist visitor id: {e}");
        }
    }
}
