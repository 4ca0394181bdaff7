//! HTTP server for signaling and management

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::HttpConfig;
use crate::entities::EntityRegistry;
use crate::peers::PeerRegistry;

use super::client::SignalingClient;
use super::handlers;

/// Shared state for the HTTP handlers
pub struct AppState {
    pub peers: Arc<PeerRegistry>,
    pub entities: Arc<EntityRegistry>,
    pub signaling: Arc<SignalingClient>,
}

/// Signaling and management API server
pub struct HttpServer {
    config: HttpConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: HttpConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Routes, exposed separately so tests can serve them on any listener.
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/peers", get(handlers::get_peers))
            .route("/api/peers/connect", post(handlers::connect_peer))
            .route("/api/peers/join", post(handlers::join_peer))
            .route("/api/peers/:uuid", delete(handlers::remove_peer))
            .route(
                "/api/sources",
                get(handlers::get_sources).post(handlers::add_source),
            )
            .route("/api/sources/:uuid", delete(handlers::remove_source))
            .route(
                "/api/sinks",
                get(handlers::get_sinks).post(handlers::add_sink),
            )
            .route("/api/sinks/:uuid", delete(handlers::remove_sink))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Run the server on a background task.
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                tracing::error!("HTTP server failed: {e}");
            }
        })
    }

    async fn serve(self) -> crate::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| crate::Error::Config(format!("bad http bind address: {e}")))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "HTTP API listening");
        axum::serve(
            listener,
            Self::router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PROTOCOL_VERSION;
    use crate::peers::{LocalIdentity, PeerState};
    use crate::protocol::{ConnectRequest, ConnectResponse, ControllerMessage, SourceKind};
    use crate::transport::MemoryTransport;
    use tokio::sync::mpsc;

    /// Full node (registries + API server) on an ephemeral port.
    async fn spawn_node(uuid: &str, transport: MemoryTransport) -> (SocketAddr, Arc<AppState>) {
        let registry = PeerRegistry::new(
            LocalIdentity::new(uuid.to_string(), format!("node-{uuid}")),
            Arc::new(transport.clone()),
        );
        let (config_tx, _config_rx) = mpsc::unbounded_channel();
        let entities = Arc::new(EntityRegistry::new(uuid.to_string(), config_tx));
        let signaling = SignalingClient::new(Arc::clone(&registry), Arc::new(transport));
        let state = Arc::new(AppState {
            peers: registry,
            entities,
            signaling,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = HttpServer::router(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, state)
    }

    fn connect_request(description: serde_json::Value, version: &str) -> ConnectRequest {
        ConnectRequest {
            name: "peer-a".to_string(),
            uuid: "A".to_string(),
            description,
            version: version.to_string(),
            instance_uuid: "i1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_connect_version_mismatch_is_rejected() {
        let transport = MemoryTransport::new();
        let (addr, state) = spawn_node("L", transport.clone()).await;
        let remote = transport.remote_initiator("A");

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/peers/connect"))
            .json(&connect_request(remote.offer(), "0.0.0-other"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.unwrap();
        let message = body["message"].as_str().unwrap();
        assert!(message.contains(PROTOCOL_VERSION));
        assert!(message.contains("0.0.0-other"));

        // nothing was installed
        assert!(state.peers.get_peer("A").is_none());
    }

    #[tokio::test]
    async fn test_connect_installs_peer_and_gossips() {
        let transport = MemoryTransport::new();
        let (addr, state) = spawn_node("L", transport.clone()).await;
        let remote = transport.remote_initiator("A");

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/peers/connect"))
            .json(&connect_request(remote.offer(), PROTOCOL_VERSION))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: ConnectResponse = response.json().await.unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.uuid, "L");

        let peer = state.peers.get_peer("A").expect("peer A missing");
        assert_eq!(peer.state(), PeerState::Connected);

        match remote.recv().await.unwrap() {
            ControllerMessage::PeerDiscovery { mut peers_uuid } => {
                peers_uuid.sort();
                assert_eq!(peers_uuid, vec!["A".to_string(), "L".to_string()]);
            }
            other => panic!("expected discovery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_peer_end_to_end() {
        let transport = MemoryTransport::new();
        let (addr1, state1) = spawn_node("N1", transport.clone()).await;
        let (_addr2, state2) = spawn_node("N2", transport.clone()).await;

        let peer = state2
            .signaling
            .join_peer(&addr1.to_string(), None, false)
            .await
            .unwrap();
        assert_eq!(peer.uuid, "N1");
        assert!(peer.is_connected());

        // both sides see each other, placeholder reconciled away
        assert!(state2.peers.get_peer("N1").unwrap().is_connected());
        assert!(state1.peers.get_peer("N2").unwrap().is_connected());
        assert_eq!(state2.peers.peers().len(), 2);
    }

    #[tokio::test]
    async fn test_add_source_via_api_gossips_to_peers() {
        let transport = MemoryTransport::new();
        let (addr, _state) = spawn_node("L", transport.clone()).await;
        let remote = transport.remote_initiator("A");

        let client = reqwest::Client::new();
        client
            .post(format!("http://{addr}/api/peers/connect"))
            .json(&connect_request(remote.offer(), PROTOCOL_VERSION))
            .send()
            .await
            .unwrap();
        assert!(remote.recv().await.is_some()); // drain discovery

        let response = client
            .post(format!("http://{addr}/api/sources"))
            .json(&serde_json::json!({ "name": "quiet", "type": "null" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);

        match remote.recv().await.unwrap() {
            ControllerMessage::AddSource { source } => {
                assert_eq!(source.name, "quiet");
                assert_eq!(source.kind, SourceKind::Null);
                assert_eq!(source.peer_uuid.as_deref(), Some("L"));
            }
            other => panic!("expected source gossip, got {other:?}"),
        }
    }
}
