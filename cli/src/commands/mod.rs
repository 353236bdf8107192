//! Subcommand implementations

pub mod health;
pub mod preview;
pub mod scan;
pub mod watch;
