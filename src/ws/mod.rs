//! Reconnecting WebSocket transport with ping/pong keepalive

mod client;
mod types;

pub use client::connect;
pub use types::{WsConfig, WsError};
