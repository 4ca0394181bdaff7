//! Peer management
//!
//! One [`Peer`] per participant in the mesh, owned by the [`PeerRegistry`].

pub mod peer;
pub mod registry;

pub use peer::{Peer, PeerState};
pub use registry::{placeholder_uuid_for_host, InboundMessage, LocalIdentity, PeerRegistry};
