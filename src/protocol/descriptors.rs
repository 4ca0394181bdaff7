//! Source and sink descriptors
//!
//! A descriptor is the plain data form of an audio entity. The same shape is
//! used for the config file, network gossip, and the local device scan, so
//! the entity registry can reconcile all three through one code path.

use serde::{Deserialize, Serialize};

/// Closed set of source types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Spotify Connect endpoint backed by a librespot process
    Librespot,
    /// Silence generator, useful for keeping a pipeline warm
    Null,
    /// Stream owned by another peer, represented here by proxy
    RemoteProxy,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Librespot => "librespot",
            SourceKind::Null => "null",
            SourceKind::RemoteProxy => "remote-proxy",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of sink types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    /// Physical output device found by the local device scan
    LocalDevice,
    /// Discards everything written to it
    Null,
    /// Sink owned by another peer, represented here by proxy
    RemoteProxy,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::LocalDevice => "local-device",
            SinkKind::Null => "null",
            SinkKind::RemoteProxy => "remote-proxy",
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor for an audio producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Absent on descriptors that have not been registered yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Owning peer; absent or equal to the local peer uuid means local
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_uuid: Option<String>,
}

impl SourceDescriptor {
    /// True iff this descriptor belongs to the process identified by `local_uuid`
    pub fn is_local(&self, local_uuid: &str) -> bool {
        match self.peer_uuid.as_deref() {
            None | Some("") => true,
            Some(peer) => peer == local_uuid,
        }
    }
}

/// Descriptor for an audio consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SinkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_uuid: Option<String>,
    /// Physical device name, set for local-device sinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl SinkDescriptor {
    /// True iff this descriptor belongs to the process identified by `local_uuid`
    pub fn is_local(&self, local_uuid: &str) -> bool {
        match self.peer_uuid.as_deref() {
            None | Some("") => true,
            Some(peer) => peer == local_uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_on_the_wire() {
        let sink = SinkDescriptor {
            uuid: Some("s1".into()),
            name: "Living Room".into(),
            kind: SinkKind::LocalDevice,
            peer_uuid: None,
            device_name: Some("hw:0,0".into()),
        };

        let json = serde_json::to_value(&sink).unwrap();
        assert_eq!(json["type"], "local-device");
        assert_eq!(json["deviceName"], "hw:0,0");
        assert!(json.get("peerUuid").is_none());
    }

    #[test]
    fn test_unknown_kind_tag_is_rejected() {
        let json = r#"{"name":"x","type":"webaudio"}"#;
        assert!(serde_json::from_str::<SourceDescriptor>(json).is_err());
    }

    #[test]
    fn test_is_local_classification() {
        let mut source = SourceDescriptor {
            uuid: None,
            name: "spotify".into(),
            kind: SourceKind::Librespot,
            peer_uuid: None,
        };
        assert!(source.is_local("L"));

        source.peer_uuid = Some("L".into());
        assert!(source.is_local("L"));

        source.peer_uuid = Some("A".into());
        assert!(!source.is_local("L"));
    }
}
