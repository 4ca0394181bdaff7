//! Peer entity and connection state

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::constants::UNKNOWN_HOST;
use crate::error::TransportError;
use crate::protocol::ControllerMessage;
use crate::transport::TransportSession;

/// Connection state of a peer
///
/// `Connecting → Connected` on a successful handshake; any state can fall to
/// `Disconnected` on transport failure, explicit disconnect, or eviction by
/// a newer instance. There is no way out of `Disconnected` except full
/// replacement by a new `Peer` for the same uuid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
}

/// One participant in the mesh
///
/// Identity fields are fixed at construction; a reconnect replaces the whole
/// object in the registry rather than mutating this one. Only the state and
/// the attached session change over a peer's lifetime.
pub struct Peer {
    pub uuid: String,
    pub name: String,
    pub host: String,
    /// Changes on every restart of the remote process; an inbound connection
    /// carrying a different value means the session we hold is stale.
    pub instance_uuid: String,
    state: RwLock<PeerState>,
    session: Mutex<Option<Box<dyn TransportSession>>>,
}

impl Peer {
    pub(crate) fn new(
        uuid: String,
        name: String,
        host: String,
        instance_uuid: String,
        state: PeerState,
    ) -> Self {
        Self {
            uuid,
            name,
            host,
            instance_uuid,
            state: RwLock::new(state),
            session: Mutex::new(None),
        }
    }

    /// Placeholder for a uuid we have heard of but never connected to.
    pub(crate) fn placeholder(uuid: &str) -> Self {
        Self::new(
            uuid.to_string(),
            uuid.to_string(),
            UNKNOWN_HOST.to_string(),
            String::new(),
            PeerState::Disconnected,
        )
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    pub(crate) fn set_state(&self, state: PeerState) {
        *self.state.write() = state;
    }

    pub(crate) async fn attach_session(&self, session: Box<dyn TransportSession>) {
        *self.session.lock().await = Some(session);
        self.set_state(PeerState::Connected);
    }

    /// Send one controller message over the attached session.
    pub async fn send(&self, message: &ControllerMessage) -> Result<(), TransportError> {
        let guard = self.session.lock().await;
        match guard.as_ref() {
            Some(session) => session.send(message).await,
            None => Err(TransportError::NoSession),
        }
    }

    /// Close the session, if any, and force the state to Disconnected.
    pub(crate) async fn disconnect(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
        self.set_state(PeerState::Disconnected);
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("instance_uuid", &self.instance_uuid)
            .field("state", &self.state())
            .finish()
    }
}
