//! Signaling exchange
//!
//! Terminal handling of the connection-establishment protocol: the HTTP
//! server receives inbound connection requests and the client performs the
//! mirror request against remote nodes. Both are pure orchestration over the
//! peer registry and the transport collaborator.

pub mod client;
pub mod handlers;
pub mod server;

pub use client::SignalingClient;
pub use server::{AppState, HttpServer};
