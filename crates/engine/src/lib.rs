//! Stoat Engine - Debounced input pipeline and background job tracking

pub mod debounce;
pub mod jobs;

pub use debounce::{Debounced, DebouncedValue};
pub use jobs::{JobBackend, JobPoller, PollerPhase, PollerState};
