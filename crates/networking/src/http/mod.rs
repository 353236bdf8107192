//! HTTP access to the Stoat REST backend

mod client;

pub use client::StoatClient;
