//! Background job tracking
//!
//! A [`JobPoller`] submits one job to a [`JobBackend`] and follows it to a
//! terminal state by polling on a fixed interval.

mod backend;
mod poller;

pub use backend::JobBackend;
pub use poller::{JobPoller, PollerPhase, PollerState};
