//! High-level API wrappers for Stoat endpoints
//!
//! Thin validation over the raw HTTP client so obviously bad input never
//! leaves the process.

mod effects;
mod jobs;

pub use effects::*;
pub use jobs::*;
