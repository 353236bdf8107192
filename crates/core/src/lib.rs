//! Stoat Core - Shared data models, types, settings, and errors

pub mod errors;
pub mod models;
pub mod settings;
pub mod types;

pub use errors::{Error, Result};
pub use models::*;
pub use settings::*;
pub use types::*;
