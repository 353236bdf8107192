//! Stoat Networking - HTTP client, API wrappers, and the realtime connection

pub mod api;
pub mod http;
pub mod websocket;

pub use http::StoatClient;
pub use websocket::{ConnectionManager, Connector, ReconnectPolicy, TungsteniteConnector};
