//! Outbound signaling

use std::sync::Arc;
use std::time::Duration;

use crate::constants::{PROTOCOL_VERSION, SIGNALING_TIMEOUT_SECS};
use crate::error::SignalingError;
use crate::peers::{placeholder_uuid_for_host, Peer, PeerRegistry, PeerState};
use crate::protocol::{ConnectRequest, ConnectResponse};
use crate::transport::Transport;

/// Outbound half of the signaling exchange
///
/// Performs the mirror request against a remote node's HTTP API and drives
/// the same registry installation logic as the inbound path.
pub struct SignalingClient {
    http: reqwest::Client,
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn Transport>,
}

impl SignalingClient {
    pub fn new(registry: Arc<PeerRegistry>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            registry,
            transport,
        })
    }

    /// Actively join the peer whose HTTP API listens on `host`.
    ///
    /// Until the handshake completes we may only know the address, so the
    /// peer is tracked under a synthetic uuid derived from it and reconciled
    /// to the real identity carried in the response. With `force` false, an
    /// already connected peer is returned as is. A rejection leaves the
    /// placeholder Disconnected but addressable.
    pub async fn join_peer(
        &self,
        host: &str,
        expected_uuid: Option<&str>,
        force: bool,
    ) -> Result<Arc<Peer>, SignalingError> {
        let key = expected_uuid
            .map(str::to_string)
            .unwrap_or_else(|| placeholder_uuid_for_host(host));

        if !force {
            if let Some(existing) = self.registry.get_peer(&key) {
                if existing.is_connected() {
                    tracing::debug!(peer = %key, host, "already connected, not rejoining");
                    return Ok(existing);
                }
            }
        }

        let placeholder = self.registry.get_or_create_peer(&key, false);
        placeholder.set_state(PeerState::Connecting);

        let pending = match self.transport.open(host).await {
            Ok(pending) => pending,
            Err(e) => {
                placeholder.set_state(PeerState::Disconnected);
                return Err(SignalingError::Request(format!("transport open failed: {e}")));
            }
        };

        let local = self.registry.local();
        let request = ConnectRequest {
            name: local.name.clone(),
            uuid: local.uuid.clone(),
            description: pending.offer(),
            version: PROTOCOL_VERSION.to_string(),
            instance_uuid: local.instance_uuid.clone(),
        };

        let url = format!("http://{host}/api/peers/connect");
        tracing::info!(%url, "joining peer");
        let response = match self
            .http
            .post(&url)
            .timeout(Duration::from_secs(SIGNALING_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                placeholder.set_state(PeerState::Disconnected);
                return Err(SignalingError::Request(e.to_string()));
            }
        };

        if !response.status().is_success() {
            placeholder.set_state(PeerState::Disconnected);
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(SignalingError::Rejected(format!("{status}: {message}")));
        }

        let body: ConnectResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                placeholder.set_state(PeerState::Disconnected);
                return Err(SignalingError::Request(format!("bad signaling response: {e}")));
            }
        };

        let (peer, events) = self
            .registry
            .install_peer(
                body.uuid.clone(),
                body.name.clone(),
                host.to_string(),
                body.instance_uuid.clone(),
            )
            .await;
        if key != peer.uuid {
            self.registry.drop_placeholder(&key, &placeholder);
        }

        let session = match pending.establish(&body.description, events).await {
            Ok(session) => session,
            Err(e) => {
                peer.set_state(PeerState::Disconnected);
                return Err(SignalingError::Request(format!(
                    "transport handshake failed: {e}"
                )));
            }
        };
        self.registry.complete_connection(&peer, session).await;
        Ok(peer)
    }
}
