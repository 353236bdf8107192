//! Realtime event envelope and the dashboard activity log
//!
//! Frames are opaque to the connection layer. Consumers that understand the
//! backend's broadcast schema parse them here; anything else is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// Maximum number of entries the activity log keeps
pub const ACTIVITY_LOG_CAPACITY: usize = 50;

/// Broadcast event types known to the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    HealthStatus,
    ScanStarted,
    ScanCompleted,
    ProjectCreated,
    Heartbeat,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::HealthStatus => "health_status",
            EventType::ScanStarted => "scan_started",
            EventType::ScanCompleted => "scan_completed",
            EventType::ProjectCreated => "project_created",
            EventType::Heartbeat => "heartbeat",
            EventType::Other(s) => s,
        }
    }

    /// `scan_completed` -> `scan completed`
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "health_status" => EventType::HealthStatus,
            "scan_started" => EventType::ScanStarted,
            "scan_completed" => EventType::ScanCompleted,
            "project_created" => EventType::ProjectCreated,
            "heartbeat" => EventType::Heartbeat,
            _ => EventType::Other(s),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

/// `{type, payload, correlation_id, timestamp}` broadcast envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ServerEvent {
    /// Parse a text frame; non-JSON or foreign frames yield `None`
    pub fn parse(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }
}

/// One row of the activity feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: Option<String>,
    pub details: Value,
}

/// Bounded, newest-first feed of realtime events
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
    next_id: u64,
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 0,
        }
    }

    /// Record an event, evicting the oldest entry once full
    pub fn push(&mut self, event: ServerEvent) -> &ActivityEntry {
        let entry = ActivityEntry {
            id: self.next_id,
            event_type: event.event_type,
            timestamp: event.timestamp,
            details: event.payload,
        };
        self.next_id += 1;

        self.entries.push_front(entry);
        self.entries.truncate(self.capacity.max(1));
        &self.entries[0]
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(ACTIVITY_LOG_CAPACITY)
    }
}
