//! Shared type definitions and newtypes

use serde::Serialize;

/// Fraction of a job that is done, always within `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Progress(f64);

impl Progress {
    /// Clamp a reported value into range. NaN is not a progress value.
    pub fn new(value: f64) -> Option<Self> {
        if value.is_nan() {
            return None;
        }
        Some(Progress(value.clamp(0.0, 1.0)))
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Whole percent, rounded (0.3 -> 30)
    pub fn percent(&self) -> u8 {
        (self.0 * 100.0).round() as u8
    }

    pub fn is_complete(&self) -> bool {
        self.0 >= 1.0
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.percent())
    }
}
