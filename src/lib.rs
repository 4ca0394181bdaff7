//! # Mesh Audio Streamer
//!
//! Peer-to-peer multi-room audio streaming over LAN.
//!
//! Every process in the mesh is an equal participant: it announces itself to
//! other peers over an HTTP signaling exchange, keeps an authoritative map of
//! every peer it knows about, and maintains the canonical set of audio
//! sources (producers) and sinks (consumers) visible to the mesh.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!                 │                  MESH NODE                   │
//!                 │                                              │
//!   HTTP POST     │  ┌────────────────┐    ┌──────────────────┐ │
//!   /api/peers/───┼─►│   Signaling    │───►│   Peer Registry  │ │
//!   connect       │  │   (signaling)  │    │     (peers)      │ │
//!                 │  └────────────────┘    └───────┬──────────┘ │
//!                 │                                │ discovery  │
//!                 │  ┌────────────────┐            │ gossip     │
//!   peer ◄────────┼──┤   Transport    │◄───────────┘            │
//!   sessions      │  │  (transport)   │                         │
//!                 │  └───────┬────────┘                         │
//!                 │          │ controller messages              │
//!                 │          ▼                                  │
//!                 │  ┌────────────────┐    ┌──────────────────┐ │
//!                 │  │ Entity Registry│───►│  Config Bridge   │ │
//!                 │  │   (entities)   │    │    (config)      │ │
//!                 │  └───────▲────────┘    └──────────────────┘ │
//!                 │          │                                  │
//!                 │  ┌───────┴────────┐                         │
//!                 │  │  Device Scan   │                         │
//!                 │  │    (audio)     │                         │
//!                 │  └────────────────┘                         │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! The peer registry owns the uuid→peer map: connection deduplication,
//! stale-session eviction after a remote restart, and broadcast fan-out with
//! per-peer failure isolation. The entity registry owns the uuid→source and
//! uuid→sink maps and reconciles descriptors arriving from the config file,
//! network gossip, and the local device scan into a single deduplicated view.

pub mod audio;
pub mod config;
pub mod entities;
pub mod error;
pub mod peers;
pub mod protocol;
pub mod signaling;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Protocol version exchanged during signaling, compared for exact equality
    pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Default HTTP port for the signaling and management API
    pub const DEFAULT_HTTP_PORT: u16 = 6512;

    /// Default TCP port for peer message sessions
    pub const DEFAULT_SESSION_PORT: u16 = 6513;

    /// Capacity of the inbound controller message channel
    pub const MESSAGE_CHANNEL_CAPACITY: usize = 256;

    /// Timeout for establishing a transport session
    pub const SESSION_CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Timeout for the signaling HTTP request
    pub const SIGNALING_TIMEOUT_SECS: u64 = 15;

    /// Host recorded for peers created lazily from a bare uuid
    pub const UNKNOWN_HOST: &str = "unknown";
}
