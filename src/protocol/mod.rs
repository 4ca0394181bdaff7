//! Wire and persistence types shared across the mesh
//!
//! Everything here is plain serde data: the signaling request/response
//! bodies, the controller message envelope exchanged over peer sessions, and
//! the source/sink descriptors used for transport, persistence, and registry
//! input.

pub mod descriptors;
pub mod messages;

pub use descriptors::{SinkDescriptor, SinkKind, SourceDescriptor, SourceKind};
pub use messages::{ConnectRequest, ConnectResponse, ControllerMessage};
