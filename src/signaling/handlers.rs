//! HTTP API handlers

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::constants::PROTOCOL_VERSION;
use crate::error::SignalingError;
use crate::peers::{Peer, PeerState};
use crate::protocol::{ConnectRequest, ControllerMessage, SinkDescriptor, SourceDescriptor};

use super::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System status
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub name: String,
    pub uuid: String,
    pub version: String,
    pub peer_count: usize,
    pub connected_peers: Vec<String>,
    pub source_count: usize,
    pub sink_count: usize,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let local = state.peers.local();
    let status = SystemStatus {
        name: local.name.clone(),
        uuid: local.uuid.clone(),
        version: PROTOCOL_VERSION.to_string(),
        peer_count: state.peers.peers().len(),
        connected_peers: state.peers.connected_uuids(),
        source_count: state.entities.source_count(),
        sink_count: state.entities.sink_count(),
    };

    Json(ApiResponse::ok(status))
}

/// Peer summary for the management API
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub uuid: String,
    pub name: String,
    pub host: String,
    pub instance_uuid: String,
    pub state: PeerState,
}

fn peer_status(peer: &Peer) -> PeerStatus {
    PeerStatus {
        uuid: peer.uuid.clone(),
        name: peer.name.clone(),
        host: peer.host.clone(),
        instance_uuid: peer.instance_uuid.clone(),
        state: peer.state(),
    }
}

/// Get all known peers
pub async fn get_peers(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<PeerStatus>>> {
    let peers = state
        .peers
        .peers()
        .iter()
        .map(|peer| peer_status(peer))
        .collect();
    Json(ApiResponse::ok(peers))
}

/// Terminal handler of the signaling exchange
///
/// Wire format is fixed: 200 with the local identity and the transport
/// answer on success, 400 with a message naming both versions on a protocol
/// mismatch.
pub async fn connect_peer(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    match state
        .peers
        .handle_inbound_connection(request, addr.ip().to_string())
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e @ SignalingError::VersionMismatch { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
    }
}

/// Ask this node to join a remote peer
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub host: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub force: bool,
}

pub async fn join_peer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinRequest>,
) -> (StatusCode, Json<ApiResponse<PeerStatus>>) {
    match state
        .signaling
        .join_peer(&request.host, request.uuid.as_deref(), request.force)
        .await
    {
        Ok(peer) => (StatusCode::OK, Json(ApiResponse::ok(peer_status(&peer)))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Remove a peer
pub async fn remove_peer(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    state.peers.remove_peer(&uuid).await;
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

/// Entity listing with its runtime activity flag
#[derive(Serialize)]
pub struct EntityStatus<T> {
    #[serde(flatten)]
    pub descriptor: T,
    pub active: bool,
}

/// Get all sources
pub async fn get_sources(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<EntityStatus<SourceDescriptor>>>> {
    let sources = state
        .entities
        .sources_with_activity()
        .into_iter()
        .map(|(descriptor, active)| EntityStatus { descriptor, active })
        .collect();
    Json(ApiResponse::ok(sources))
}

/// Create or update a source
pub async fn add_source(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<SourceDescriptor>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    match state.entities.add_source(descriptor) {
        Ok(uuid) => {
            // gossip the canonical descriptor so other peers mirror it
            if let Some(source) = state.entities.source_descriptor(&uuid) {
                state
                    .peers
                    .broadcast(ControllerMessage::AddSource { source }, &[])
                    .await;
            }
            (StatusCode::CREATED, Json(ApiResponse::ok(uuid)))
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Remove a source; removing an unknown uuid is a no-op
pub async fn remove_source(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    state.entities.remove_source(&uuid);
    state
        .peers
        .broadcast(ControllerMessage::RemoveSource { uuid }, &[])
        .await;
    (StatusCode::OK, Json(ApiResponse::ok(())))
}

/// Get all sinks
pub async fn get_sinks(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<EntityStatus<SinkDescriptor>>>> {
    let sinks = state
        .entities
        .sinks_with_activity()
        .into_iter()
        .map(|(descriptor, active)| EntityStatus { descriptor, active })
        .collect();
    Json(ApiResponse::ok(sinks))
}

/// Create or update a sink
pub async fn add_sink(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<SinkDescriptor>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    match state.entities.add_sink(descriptor) {
        Ok(uuid) => {
            if let Some(sink) = state.entities.sink_descriptor(&uuid) {
                state
                    .peers
                    .broadcast(ControllerMessage::AddSink { sink }, &[])
                    .await;
            }
            (StatusCode::CREATED, Json(ApiResponse::ok(uuid)))
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Remove a sink; removing an unknown uuid is a no-op
pub async fn remove_sink(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    state.entities.remove_sink(&uuid);
    state
        .peers
        .broadcast(ControllerMessage::RemoveSink { uuid }, &[])
        .await;
    (StatusCode::OK, Json(ApiResponse::ok(())))
}
