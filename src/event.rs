//! Event model and wire format.
//!
//! An [`Event`] carries the page, the action, and any timing details;
//! [`Event::to_value`] renders the exact parameter shape the ingestion
//! endpoint accepts. Session and visitor identity are stamped on after
//! construction, normally by the recorder.

use crate::session::SessionInfo;
use crate::visitor::VisitorInfo;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A page was opened
    #[serde(rename = "pageview")]
    Pageview,
    /// Engaged time accumulated on a page
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Playback of a video began
    #[serde(rename = "videostart")]
    VideoStart,
    /// Watch time accumulated on a video
    #[serde(rename = "vheartbeat")]
    VideoHeartbeat,
}

impl Action {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pageview => "pageview",
            Action::Heartbeat => "heartbeat",
            Action::VideoStart => "videostart",
            Action::VideoHeartbeat => "vheartbeat",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content metadata attached to an event. Only populated fields are
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Content length in seconds. Reporting only; heartbeat pacing is
    /// driven by the duration handed to the video tracker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
}

/// Timing payload carried only by heartbeat events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatData {
    /// Total engaged milliseconds accumulated for the key so far
    pub total_ms: u64,
    /// Engaged seconds covered by this heartbeat alone
    pub engaged_secs: u64,
}

/// One analytics event, from construction through delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub action: Action,
    pub url: String,
    pub referrer: String,
    /// Site identifier; stamped by the recorder
    pub site_id: String,
    /// Caller-supplied key/value pairs folded into the data block
    pub extra_data: Map<String, Value>,
    pub metadata: Option<Metadata>,
    /// Construction time, in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub heartbeat: Option<HeartbeatData>,
    pub session: Option<SessionInfo>,
    pub visitor_id: Option<String>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(action: Action, url: impl Into<String>) -> Self {
        Self {
            action,
            url: url.into(),
            referrer: String::new(),
            site_id: String::new(),
            extra_data: Map::new(),
            metadata: None,
            timestamp_ms: Utc::now().timestamp_millis(),
            heartbeat: None,
            session: None,
            visitor_id: None,
        }
    }

    /// Set the referrer of the page that produced the event.
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    /// Attach content metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Merge caller-supplied fields into the data block.
    pub fn with_extra_data(mut self, extra_data: Map<String, Value>) -> Self {
        self.extra_data = extra_data;
        self
    }

    /// Attach heartbeat timing.
    pub fn with_heartbeat(mut self, total_ms: u64, engaged_secs: u64) -> Self {
        self.heartbeat = Some(HeartbeatData {
            total_ms,
            engaged_secs,
        });
        self
    }

    /// Stamp session identity onto the event.
    pub fn set_session_info(&mut self, session: SessionInfo) {
        self.session = Some(session);
    }

    /// Stamp the visitor id onto the event.
    pub fn set_visitor_info(&mut self, visitor: &VisitorInfo) {
        self.visitor_id = Some(visitor.id.clone());
    }

    /// Render the event into the flat parameter object the endpoint
    /// accepts.
    ///
    /// Session fields appear only when a session was stamped, and the
    /// `tt`/`inc` pair only on heartbeats. The visitor id travels
    /// inside the data block as `visitor_uuid`.
    pub fn to_value(&self) -> Value {
        let mut params = Map::new();
        params.insert("url".into(), Value::from(self.url.clone()));
        params.insert("urlref".into(), Value::from(self.referrer.clone()));
        params.insert("idsite".into(), Value::from(self.site_id.clone()));
        params.insert("action".into(), Value::from(self.action.as_str()));

        let mut data = self.extra_data.clone();
        data.insert("ts".into(), Value::from(self.timestamp_ms));
        if let Some(visitor_id) = &self.visitor_id {
            data.insert("visitor_uuid".into(), Value::from(visitor_id.clone()));
        }
        params.insert("data".into(), Value::Object(data));

        if let Some(metadata) = &self.metadata {
            if let Ok(value) = serde_json::to_value(metadata) {
                params.insert("metadata".into(), value);
            }
        }

        if let Some(session) = &self.session {
            params.insert("sid".into(), Value::from(session.id));
            params.insert("sts".into(), Value::from(session.timestamp_ms));
            params.insert("surl".into(), Value::from(session.url.clone()));
            params.insert("sref".into(), Value::from(session.referrer.clone()));
            params.insert(
                "slts".into(),
                Value::from(session.last_session_timestamp_ms),
            );
        }

        if let Some(heartbeat) = &self.heartbeat {
            params.insert("tt".into(), Value::from(heartbeat.total_ms));
            params.insert("inc".into(), Value::from(heartbeat.engaged_secs));
        }

        Value::Object(params)
    }
}
