//! Capped exponential backoff for reconnect attempts, plus the bound on a
//! single open attempt

use std::time::Duration;
use stoat_core::ReconnectSettings;

/// `delay(n) = min(base * 2^n, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    connect_timeout: Duration,
}

impl ReconnectPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(30_000);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// An open attempt still pending after `timeout` counts as failed
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
        .with_connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
    }

    /// Delay before reconnecting, given how many attempts already failed
    /// since the last successful open.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}
