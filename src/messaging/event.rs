use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types carried by the in-process broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Alert feed events
    AlertRaised,
    AlertStatusChanged,
    AlertsAcknowledged,
    FeedReconciled,

    // Capture events
    CaptureStarted,
    CaptureStopped,
    DetectionFailed,

    // Analytics events
    AnalyticsUpdated,

    // System events
    SystemStartup,
    SystemShutdown,

    // Custom event
    Custom(String),
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlertRaised => write!(f, "alert.raised"),
            Self::AlertStatusChanged => write!(f, "alert.status_changed"),
            Self::AlertsAcknowledged => write!(f, "alert.acknowledged_all"),
            Self::FeedReconciled => write!(f, "feed.reconciled"),
            Self::CaptureStarted => write!(f, "capture.started"),
            Self::CaptureStopped => write!(f, "capture.stopped"),
            Self::DetectionFailed => write!(f, "capture.detection_failed"),
            Self::AnalyticsUpdated => write!(f, "analytics.updated"),
            Self::SystemStartup => write!(f, "system.startup"),
            Self::SystemShutdown => write!(f, "system.shutdown"),
            Self::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    /// Event type
    pub event_type: EventType,
    /// Event source ID (e.g., capture session ID)
    pub source_id: Option<Uuid>,
    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Event data payload
    pub payload: serde_json::Value,
}

impl EventMessage {
    /// Create a new event message
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Create a new event message with empty payload
    pub fn new_empty(event_type: EventType, source_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    /// Get the routing key for the event
    pub fn routing_key(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }
}

/// Topic-style match: `*` is exactly one word, `#` is zero or more words
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((word, rest)) => match key.split_first() {
            Some((first, key_rest)) => (*word == "*" || word == first) && matches_words(rest, key_rest),
            None => false,
        },
    }
}
