//! Peer registry
//!
//! Single authoritative map from peer uuid to [`Peer`]. The registry is the
//! sole mutator of that map: inbound connections, outbound joins, discovery
//! gossip, and broadcast fan-out all go through it. It is constructed exactly
//! once per process and shared as an `Arc` with every collaborator that needs
//! it.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::constants::{MESSAGE_CHANNEL_CAPACITY, PROTOCOL_VERSION, UNKNOWN_HOST};
use crate::error::SignalingError;
use crate::protocol::{ConnectRequest, ConnectResponse, ControllerMessage};
use crate::transport::{SessionEvent, SessionEvents, Transport, TransportSession};

use super::{Peer, PeerState};

/// Identity of this process within the mesh
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Stable across restarts; persisted in the config file
    pub uuid: String,
    pub name: String,
    /// Fresh on every process start; lets other peers detect our restarts
    pub instance_uuid: String,
}

impl LocalIdentity {
    pub fn new(uuid: String, name: String) -> Self {
        Self {
            uuid,
            name,
            instance_uuid: Uuid::new_v4().to_string(),
        }
    }
}

/// A controller message delivered by one of our peers
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: String,
    pub message: ControllerMessage,
}

/// Deterministic placeholder uuid for a peer we only know by address.
///
/// Reconciled to the real uuid once the handshake completes.
pub fn placeholder_uuid_for_host(host: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, host.as_bytes()).to_string()
}

pub struct PeerRegistry {
    local: LocalIdentity,
    peers: DashMap<String, Arc<Peer>>,
    transport: Arc<dyn Transport>,
    messages: broadcast::Sender<InboundMessage>,
}

impl PeerRegistry {
    /// Build the registry with the local peer already installed.
    ///
    /// The local peer is Connected from the start and can never be removed.
    pub fn new(local: LocalIdentity, transport: Arc<dyn Transport>) -> Arc<Self> {
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let registry = Arc::new(Self {
            local: local.clone(),
            peers: DashMap::new(),
            transport,
            messages,
        });

        let own = Peer::new(
            local.uuid,
            local.name,
            "localhost".to_string(),
            local.instance_uuid,
            PeerState::Connected,
        );
        registry.peers.insert(own.uuid.clone(), Arc::new(own));
        registry
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.local
    }

    pub fn get_peer(&self, uuid: &str) -> Option<Arc<Peer>> {
        self.peers.get(uuid).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every known peer, the local one included
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Uuids of all currently connected peers, the local one included
    pub fn connected_uuids(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Handle an inbound connection request relayed by the signaling layer.
    ///
    /// Rejects on protocol version mismatch before touching any state. A
    /// known uuid arriving with a different instance uuid means the remote
    /// process restarted: the session we still hold is stale and gets torn
    /// down before the new peer is installed.
    pub async fn handle_inbound_connection(
        self: &Arc<Self>,
        request: ConnectRequest,
        host: String,
    ) -> Result<ConnectResponse, SignalingError> {
        if request.version != PROTOCOL_VERSION {
            tracing::warn!(
                peer = %request.uuid,
                "rejecting connection: version mismatch (local {PROTOCOL_VERSION}, remote {})",
                request.version
            );
            return Err(SignalingError::VersionMismatch {
                local: PROTOCOL_VERSION.to_string(),
                remote: request.version,
            });
        }
        if request.uuid == self.local.uuid {
            return Err(SignalingError::Rejected(
                "peer uuid matches the local peer".to_string(),
            ));
        }

        let (peer, events) = self
            .install_peer(
                request.uuid.clone(),
                request.name.clone(),
                host,
                request.instance_uuid.clone(),
            )
            .await;

        let (session, answer) = match self.transport.accept(&request.description, events).await {
            Ok(accepted) => accepted,
            Err(e) => {
                peer.set_state(PeerState::Disconnected);
                return Err(SignalingError::Request(format!(
                    "transport handshake failed: {e}"
                )));
            }
        };

        self.complete_connection(&peer, session).await;
        Ok(ConnectResponse::ok(
            answer,
            self.local.uuid.clone(),
            self.local.name.clone(),
            self.local.instance_uuid.clone(),
        ))
    }

    /// Install a Connecting peer for `uuid`, evicting any stale session.
    ///
    /// Returns the peer together with the event channel its session must
    /// report into. Used by both the inbound path and the outbound join.
    pub(crate) async fn install_peer(
        self: &Arc<Self>,
        uuid: String,
        name: String,
        host: String,
        instance_uuid: String,
    ) -> (Arc<Peer>, SessionEvents) {
        if let Some(existing) = self.get_peer(&uuid) {
            if !existing.instance_uuid.is_empty() && existing.instance_uuid != instance_uuid {
                tracing::info!(
                    peer = %uuid,
                    old_instance = %existing.instance_uuid,
                    new_instance = %instance_uuid,
                    "evicting stale session after peer restart"
                );
            }
            existing.disconnect().await;
        }

        let peer = Arc::new(Peer::new(uuid, name, host, instance_uuid, PeerState::Connecting));
        self.peers.insert(peer.uuid.clone(), Arc::clone(&peer));
        let events = self.session_events(Arc::clone(&peer));
        (peer, events)
    }

    /// Attach the established session and gossip the connected peer set.
    pub(crate) async fn complete_connection(&self, peer: &Arc<Peer>, session: Box<dyn TransportSession>) {
        peer.attach_session(session).await;
        tracing::info!(peer = %peer.uuid, name = %peer.name, "peer connected");
        self.send_discovery(peer).await;
    }

    /// Drop a host-derived placeholder once the real uuid is known.
    pub(crate) fn drop_placeholder(&self, key: &str, expected: &Arc<Peer>) {
        self.peers
            .remove_if(key, |_, current| Arc::ptr_eq(current, expected));
    }

    /// Lazy lookup: unknown uuids become Disconnected placeholders.
    ///
    /// Never fails. A placeholder has no host to dial, so `auto_connect`
    /// cannot do more than note the intent; joining by address is the
    /// outbound path that upgrades it.
    pub fn get_or_create_peer(&self, uuid: &str, auto_connect: bool) -> Arc<Peer> {
        if let Some(peer) = self.get_peer(uuid) {
            return peer;
        }
        let entry = self
            .peers
            .entry(uuid.to_string())
            .or_insert_with(|| Arc::new(Peer::placeholder(uuid)));
        let peer = Arc::clone(entry.value());
        drop(entry);
        tracing::info!(peer = %uuid, "created placeholder peer");
        if auto_connect && peer.host == UNKNOWN_HOST {
            tracing::debug!(peer = %uuid, "auto-connect deferred: no known host");
        }
        peer
    }

    /// Send `message` to every connected remote peer not listed in `exclude`.
    ///
    /// Sends run concurrently and resolve independently: a failing peer is
    /// logged and counted out, and never keeps the message from the others.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, message: ControllerMessage, exclude: &[&str]) -> usize {
        let targets: Vec<Arc<Peer>> = self
            .peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|peer| {
                peer.uuid != self.local.uuid
                    && peer.is_connected()
                    && !exclude.contains(&peer.uuid.as_str())
            })
            .collect();

        let sends = targets.iter().map(|peer| {
            let message = &message;
            async move { (peer.uuid.as_str(), peer.send(message).await) }
        });

        let mut delivered = 0;
        for (uuid, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(peer = %uuid, "broadcast delivery failed: {e}"),
            }
        }
        delivered
    }

    /// Subscribe to controller messages from all peers.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.messages.subscribe()
    }

    /// Remove a peer and tear its session down. Idempotent; the local peer
    /// is never removable.
    pub async fn remove_peer(&self, uuid: &str) {
        if uuid == self.local.uuid {
            tracing::warn!("refusing to remove the local peer");
            return;
        }
        match self.peers.remove(uuid) {
            Some((_, peer)) => {
                peer.disconnect().await;
                tracing::info!(peer = %uuid, "peer removed");
            }
            None => tracing::info!(peer = %uuid, "ignoring removal of unknown peer"),
        }
    }

    /// Event channel for one session, pumped on its own task.
    fn session_events(self: &Arc<Self>, peer: Arc<Peer>) -> SessionEvents {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::Message(message) => registry.on_message(&peer.uuid, message),
                    SessionEvent::Closed => {
                        registry.on_session_closed(&peer);
                        break;
                    }
                }
            }
        });
        tx
    }

    fn on_message(&self, from: &str, message: ControllerMessage) {
        if let ControllerMessage::PeerDiscovery { peers_uuid } = &message {
            for uuid in peers_uuid {
                if uuid != &self.local.uuid && !self.peers.contains_key(uuid) {
                    self.get_or_create_peer(uuid, true);
                }
            }
        }
        let _ = self.messages.send(InboundMessage {
            from: from.to_string(),
            message,
        });
    }

    fn on_session_closed(&self, peer: &Arc<Peer>) {
        // The closed session may belong to an already-evicted peer object;
        // only the current map entry gets the disconnect log.
        let is_current = self
            .peers
            .get(&peer.uuid)
            .map(|entry| Arc::ptr_eq(entry.value(), peer))
            .unwrap_or(false);
        peer.set_state(PeerState::Disconnected);
        if is_current {
            tracing::info!(peer = %peer.uuid, "peer disconnected");
        } else {
            tracing::debug!(peer = %peer.uuid, "stale session closed");
        }
    }

    async fn send_discovery(&self, peer: &Arc<Peer>) {
        let message = ControllerMessage::PeerDiscovery {
            peers_uuid: self.connected_uuids(),
        };
        if let Err(e) = peer.send(&message).await {
            tracing::warn!(peer = %peer.uuid, "discovery gossip failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryRemote, MemoryTransport};
    use std::time::Duration;

    fn test_registry() -> (Arc<PeerRegistry>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let registry = PeerRegistry::new(
            LocalIdentity::new("L".to_string(), "local".to_string()),
            Arc::new(transport.clone()),
        );
        (registry, transport)
    }

    fn connect_request(remote: &MemoryRemote, uuid: &str, instance: &str) -> ConnectRequest {
        ConnectRequest {
            name: format!("peer-{uuid}"),
            uuid: uuid.to_string(),
            description: remote.offer(),
            version: PROTOCOL_VERSION.to_string(),
            instance_uuid: instance.to_string(),
        }
    }

    async fn connect_peer(
        registry: &Arc<PeerRegistry>,
        transport: &MemoryTransport,
        uuid: &str,
        instance: &str,
    ) -> MemoryRemote {
        let remote = transport.remote_initiator(&format!("{uuid}/{instance}"));
        registry
            .handle_inbound_connection(connect_request(&remote, uuid, instance), "10.0.0.9".into())
            .await
            .unwrap();
        remote
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_local_peer_present_and_immortal() {
        let (registry, _) = test_registry();

        let local = registry.get_peer("L").expect("local peer missing");
        assert!(local.is_connected());

        registry.remove_peer("L").await;
        assert!(registry.get_peer("L").is_some());
    }

    #[tokio::test]
    async fn test_inbound_connection_and_discovery() {
        let (registry, transport) = test_registry();

        let remote = connect_peer(&registry, &transport, "A", "i1").await;

        let peer = registry.get_peer("A").expect("peer A missing");
        assert_eq!(peer.state(), PeerState::Connected);
        assert_eq!(peer.host, "10.0.0.9");

        // the freshly connected peer is told about everyone, itself included
        match remote.recv().await.unwrap() {
            ControllerMessage::PeerDiscovery { mut peers_uuid } => {
                peers_uuid.sort();
                assert_eq!(peers_uuid, vec!["A".to_string(), "L".to_string()]);
            }
            other => panic!("expected discovery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_version_mismatch_rejects_without_installing() {
        let (registry, transport) = test_registry();
        let remote = transport.remote_initiator("A/i1");

        let mut request = connect_request(&remote, "A", "i1");
        request.version = "0.0.0-other".to_string();

        let err = registry
            .handle_inbound_connection(request, "10.0.0.9".into())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains(PROTOCOL_VERSION));
        assert!(message.contains("0.0.0-other"));
        assert!(registry.get_peer("A").is_none());
    }

    #[tokio::test]
    async fn test_reconnect_with_new_instance_evicts_stale_session() {
        let (registry, transport) = test_registry();

        let remote1 = connect_peer(&registry, &transport, "A", "i1").await;
        assert!(remote1.recv().await.is_some()); // drain discovery

        let remote2 = connect_peer(&registry, &transport, "A", "i2").await;

        // exactly one peer for the uuid, bound to the new instance
        let peers: Vec<_> = registry
            .peers()
            .into_iter()
            .filter(|p| p.uuid == "A")
            .collect();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].instance_uuid, "i2");
        assert!(peers[0].is_connected());

        // the old session was torn down, the new one greeted
        assert_eq!(remote1.recv().await, None);
        assert!(remote2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_and_isolates_failures() {
        let (registry, transport) = test_registry();

        let remote_a = connect_peer(&registry, &transport, "A", "i1").await;
        let remote_b = connect_peer(&registry, &transport, "B", "i1").await;
        let remote_c = connect_peer(&registry, &transport, "C", "i1").await;
        for remote in [&remote_a, &remote_b, &remote_c] {
            assert!(remote.recv().await.is_some()); // drain discovery
        }

        let message = ControllerMessage::RemoveSource {
            uuid: "s1".to_string(),
        };

        // B failing must not keep A or C from receiving
        remote_b.fail_sends(true);
        let delivered = registry.broadcast(message.clone(), &[]).await;
        assert_eq!(delivered, 2);
        assert_eq!(remote_a.recv().await, Some(message.clone()));
        assert_eq!(remote_c.recv().await, Some(message.clone()));
        assert!(remote_b.try_recv().is_none());

        // exclusion list is honored
        remote_b.fail_sends(false);
        let delivered = registry.broadcast(message.clone(), &["A"]).await;
        assert_eq!(delivered, 2);
        assert_eq!(remote_b.recv().await, Some(message.clone()));
        assert_eq!(remote_c.recv().await, Some(message));
        assert!(remote_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_peer_is_lazy_and_stable() {
        let (registry, _) = test_registry();

        let peer = registry.get_or_create_peer("X", false);
        assert_eq!(peer.state(), PeerState::Disconnected);
        assert_eq!(peer.host, UNKNOWN_HOST);

        let again = registry.get_or_create_peer("X", true);
        assert!(Arc::ptr_eq(&peer, &again));
    }

    #[tokio::test]
    async fn test_discovery_gossip_creates_placeholders() {
        let (registry, transport) = test_registry();
        let mut messages = registry.subscribe();

        let remote = connect_peer(&registry, &transport, "A", "i1").await;
        remote.send(ControllerMessage::PeerDiscovery {
            peers_uuid: vec!["L".into(), "A".into(), "X".into()],
        });

        let registry2 = Arc::clone(&registry);
        wait_for(move || registry2.get_peer("X").is_some()).await;
        assert_eq!(
            registry.get_peer("X").unwrap().state(),
            PeerState::Disconnected
        );

        // subscribers see the message too
        let inbound = messages.recv().await.unwrap();
        assert_eq!(inbound.from, "A");
        assert!(matches!(
            inbound.message,
            ControllerMessage::PeerDiscovery { .. }
        ));
    }

    #[tokio::test]
    async fn test_remove_peer_is_idempotent() {
        let (registry, transport) = test_registry();

        registry.remove_peer("nobody").await;

        let _remote = connect_peer(&registry, &transport, "A", "i1").await;
        registry.remove_peer("A").await;
        assert!(registry.get_peer("A").is_none());

        registry.remove_peer("A").await;
        assert!(registry.get_peer("L").is_some());
    }
}
