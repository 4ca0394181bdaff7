//! Signaling bodies and the controller message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SinkDescriptor, SourceDescriptor};

/// Inbound connection request, POSTed by a peer that wants to join us
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub name: String,
    pub uuid: String,
    /// Transport-specific handshake payload, opaque to the registry
    pub description: Value,
    pub version: String,
    pub instance_uuid: String,
}

/// Successful connection response; every field identifies the local peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub status: String,
    pub description: Value,
    pub uuid: String,
    pub name: String,
    pub instance_uuid: String,
}

impl ConnectResponse {
    pub fn ok(description: Value, uuid: String, name: String, instance_uuid: String) -> Self {
        Self {
            status: "ok".to_string(),
            description,
            uuid,
            name,
            instance_uuid,
        }
    }
}

/// Controller messages exchanged over established peer sessions
///
/// The envelope is `{type: string, ...payload}`; the `type` tag selects the
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControllerMessage {
    /// Uuids of all peers the sender currently sees as connected, including
    /// itself. Receivers lazily create peers for uuids they do not know,
    /// which makes discovery transitive across the mesh.
    #[serde(rename_all = "camelCase")]
    PeerDiscovery { peers_uuid: Vec<String> },

    #[serde(rename_all = "camelCase")]
    AddSource { source: SourceDescriptor },

    #[serde(rename_all = "camelCase")]
    AddSink { sink: SinkDescriptor },

    #[serde(rename_all = "camelCase")]
    RemoveSource { uuid: String },

    #[serde(rename_all = "camelCase")]
    RemoveSink { uuid: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_discovery_envelope() {
        let msg = ControllerMessage::PeerDiscovery {
            peers_uuid: vec!["L".into(), "A".into()],
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "peerDiscovery");
        assert_eq!(json["peersUuid"][0], "L");

        let parsed: ControllerMessage =
            serde_json::from_str(r#"{"type":"peerDiscovery","peersUuid":["L","A"]}"#).unwrap();
        assert_eq!(parsed, msg);
    }
}
