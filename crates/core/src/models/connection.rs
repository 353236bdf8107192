//! Realtime connection models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Realtime connection state
///
/// `Connecting` is the state of a fresh manager's first attempt.
/// `Disconnected` is only entered through an explicit teardown and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Connecting, Connected) | (Connecting, Reconnecting) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Connected) | (Reconnecting, Reconnecting) => true,
            _ => false,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Human-readable label for status displays
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting...",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Consecutive failed connection attempts since the last successful open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
}

impl RetryState {
    /// Record a lost or failed connection, returning the attempt index
    /// the next backoff delay must be computed from.
    pub fn record_failure(&mut self) -> u32 {
        let current = self.attempt;
        self.attempt = self.attempt.saturating_add(1);
        current
    }

    /// Called immediately after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// The most recently received realtime frame
///
/// Only the latest frame is retained; slow consumers may miss intermediate ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Arrival order within one connection manager, starting at 1
    pub seq: u64,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}
