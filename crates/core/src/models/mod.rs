//! Data models shared by the realtime, debounce, and job layers

mod connection;
mod event;
mod health;
mod job;

pub use connection::*;
pub use event::*;
pub use health::*;
pub use job::*;
