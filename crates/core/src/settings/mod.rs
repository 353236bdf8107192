//! Client configuration
//!
//! Every field has a default so a partial JSON document (or none at all)
//! yields a working configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff for the realtime connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How long one open attempt (TCP + upgrade handshake) may take
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_base_delay_ms() -> u64 { 1_000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_connect_timeout_ms() -> u64 { 10_000 }

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Job status polling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Give up after this many consecutive failed status fetches (None = never)
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

fn default_poll_interval_ms() -> u64 { 1_000 }

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_consecutive_failures: None,
        }
    }
}

/// Quiet window for debounced inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceSettings {
    #[serde(default = "default_debounce_window_ms")]
    pub window_ms: u64,
}

fn default_debounce_window_ms() -> u64 { 300 }

impl DebounceSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            window_ms: default_debounce_window_ms(),
        }
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// REST API origin, e.g. `http://localhost:8000`
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Realtime endpoint, e.g. `ws://localhost:8000/ws`
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub debounce: DebounceSettings,
}

fn default_api_base_url() -> String { "http://localhost:8000".to_string() }
fn default_ws_url() -> String { "ws://localhost:8000/ws".to_string() }
fn default_request_timeout_ms() -> u64 { 10_000 }

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_url: default_ws_url(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect: ReconnectSettings::default(),
            poll: PollSettings::default(),
            debounce: DebounceSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: ClientSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject values that would make the timers spin or never fire
    pub fn validate(&self) -> Result<()> {
        if self.reconnect.base_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.base_delay_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) is below base_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }
        if self.reconnect.connect_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnect.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll.interval_ms must be positive".to_string(),
            ));
        }
        if self.api_base_url.trim().is_empty() || self.ws_url.trim().is_empty() {
            return Err(Error::InvalidConfig("endpoint URLs must not be empty".to_string()));
        }
        Ok(())
    }
}
