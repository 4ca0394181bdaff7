//! Transport sessions for peer links
//!
//! The registries treat a peer link as an opaque session: something that can
//! carry controller messages in order and report when it dies. Session
//! negotiation is a handshake of transport-specific `description` payloads
//! relayed through the signaling exchange; the registry never looks inside
//! them.
//!
//! Two implementations are provided: [`memory::MemoryTransport`] wires
//! sessions through in-process channels and backs the registry tests, and
//! [`tcp::TcpTransport`] speaks line-delimited JSON over TCP.

pub mod memory;
pub mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::ControllerMessage;

/// Events a live session pushes back to the registry that owns it
#[derive(Debug)]
pub enum SessionEvent {
    /// A controller message arrived from the remote peer
    Message(ControllerMessage),
    /// The session is gone; no further events will follow
    Closed,
}

/// Sender half handed to the transport when a session is created
pub type SessionEvents = mpsc::UnboundedSender<SessionEvent>;

/// An established peer link
///
/// Messages sent on the same session arrive in send order. Nothing is
/// guaranteed across different sessions.
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn send(&self, message: &ControllerMessage) -> Result<(), TransportError>;

    /// Tear the session down. Idempotent; cancels any in-flight handshake.
    async fn close(&self);
}

/// Initiator half of a handshake, created before the signaling request
#[async_trait]
pub trait PendingSession: Send {
    /// Handshake payload to carry in the signaling request
    fn offer(&self) -> Value;

    /// Complete the handshake with the responder's answer
    async fn establish(
        self: Box<Self>,
        answer: &Value,
        events: SessionEvents,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// Factory for peer sessions; the external collaborator boundary
#[async_trait]
pub trait Transport: Send + Sync {
    /// Responder side: consume a remote offer and produce a live session
    /// plus the answer payload to relay back to the initiator.
    async fn accept(
        &self,
        offer: &Value,
        events: SessionEvents,
    ) -> Result<(Box<dyn TransportSession>, Value), TransportError>;

    /// Initiator side: prepare a handshake toward `host`.
    async fn open(&self, host: &str) -> Result<Box<dyn PendingSession>, TransportError>;
}
