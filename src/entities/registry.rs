//! Source/sink registry
//!
//! Canonical, deduplicated view of every audio entity this process knows
//! about. Descriptors arrive from three places that know nothing of each
//! other (the config file, network gossip, the local device scan) and are
//! reconciled here: an add for a known uuid is an in-place update, and
//! autodetected device sinks are matched by device name even before their
//! uuid is known. Local entities are republished to the config bridge on
//! creation and on every change.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ConfigEvent;
use crate::error::EntityError;
use crate::protocol::{SinkDescriptor, SinkKind, SourceDescriptor};

use super::{Sink, Source};

pub struct EntityRegistry {
    local_uuid: String,
    sources: DashMap<String, Source>,
    sinks: DashMap<String, Sink>,
    config_tx: mpsc::UnboundedSender<ConfigEvent>,
}

impl EntityRegistry {
    pub fn new(local_uuid: String, config_tx: mpsc::UnboundedSender<ConfigEvent>) -> Self {
        Self {
            local_uuid,
            sources: DashMap::new(),
            sinks: DashMap::new(),
            config_tx,
        }
    }

    /// Register or update a source. Returns its uuid.
    ///
    /// A descriptor whose uuid is already present updates the existing
    /// entity in place; nothing is ever duplicated. New local descriptors
    /// are dispatched on their kind, get a generated uuid if they carry
    /// none, and are announced to the config bridge. New remote descriptors
    /// become proxy entities and must already carry their owner's uuid.
    pub fn add_source(&self, mut descriptor: SourceDescriptor) -> Result<String, EntityError> {
        if descriptor.is_local(&self.local_uuid) {
            // canonical local descriptors always carry our uuid; gossiped
            // copies then classify as remote on other peers
            descriptor.peer_uuid = Some(self.local_uuid.clone());
        }

        if let Some(uuid) = descriptor.uuid.clone() {
            if let Some(mut existing) = self.sources.get_mut(&uuid) {
                let changed = existing.update_info(&descriptor);
                tracing::debug!(source = %uuid, changed, "source already known, updated in place");
                if changed && existing.is_local() {
                    self.emit(ConfigEvent::SourceUpdated(existing.descriptor().clone()));
                }
                return Ok(uuid);
            }
        }

        if descriptor.is_local(&self.local_uuid) {
            let uuid = descriptor
                .uuid
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            let source = Source::new_local(descriptor)?;
            tracing::info!(source = %uuid, kind = %source.kind(), name = %source.name(), "registered local source");
            self.emit(ConfigEvent::SourceAdded(source.descriptor().clone()));
            self.sources.insert(uuid.clone(), source);
            Ok(uuid)
        } else {
            let uuid = descriptor.uuid.clone().ok_or_else(|| EntityError::MissingUuid {
                name: descriptor.name.clone(),
            })?;
            tracing::info!(source = %uuid, peer = ?descriptor.peer_uuid, "registered remote source proxy");
            self.sources.insert(uuid.clone(), Source::new_remote(descriptor));
            Ok(uuid)
        }
    }

    /// Register or update a sink. Returns its uuid.
    ///
    /// Same semantics as [`add_source`](Self::add_source), with one extra
    /// reconciliation step: a local device-backed descriptor with no uuid
    /// match is looked up by device name first, so a device rescan that does
    /// not know the previously-assigned uuid updates the existing sink
    /// instead of creating a twin.
    pub fn add_sink(&self, mut descriptor: SinkDescriptor) -> Result<String, EntityError> {
        if descriptor.is_local(&self.local_uuid) {
            descriptor.peer_uuid = Some(self.local_uuid.clone());
        }

        if let Some(uuid) = descriptor.uuid.clone() {
            if let Some(mut existing) = self.sinks.get_mut(&uuid) {
                let changed = existing.update_info(&descriptor);
                tracing::debug!(sink = %uuid, changed, "sink already known, updated in place");
                if changed && existing.is_local() {
                    self.emit(ConfigEvent::SinkUpdated(existing.descriptor().clone()));
                }
                return Ok(uuid);
            }
        }

        let local = descriptor.is_local(&self.local_uuid);
        if local && descriptor.kind == SinkKind::LocalDevice {
            if let Some(device_name) = descriptor.device_name.clone() {
                if let Some(uuid) = self.find_local_device_sink(&device_name) {
                    if let Some(mut existing) = self.sinks.get_mut(&uuid) {
                        let changed = existing.update_info(&descriptor);
                        tracing::debug!(sink = %uuid, device = %device_name, changed, "device sink matched by name");
                        if changed {
                            self.emit(ConfigEvent::SinkUpdated(existing.descriptor().clone()));
                        }
                        return Ok(uuid);
                    }
                }
            }
        }

        if local {
            let uuid = descriptor
                .uuid
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            let sink = Sink::new_local(descriptor)?;
            tracing::info!(sink = %uuid, kind = %sink.kind(), name = %sink.name(), "registered local sink");
            self.emit(ConfigEvent::SinkAdded(sink.descriptor().clone()));
            self.sinks.insert(uuid.clone(), sink);
            Ok(uuid)
        } else {
            let uuid = descriptor.uuid.clone().ok_or_else(|| EntityError::MissingUuid {
                name: descriptor.name.clone(),
            })?;
            tracing::info!(sink = %uuid, peer = ?descriptor.peer_uuid, "registered remote sink proxy");
            self.sinks.insert(uuid.clone(), Sink::new_remote(descriptor));
            Ok(uuid)
        }
    }

    /// Remove a source. Unknown uuids are a logged no-op.
    pub fn remove_source(&self, uuid: &str) {
        match self.sources.remove(uuid) {
            Some(_) => tracing::info!(source = %uuid, "source removed"),
            None => tracing::info!(source = %uuid, "ignoring removal of unknown source"),
        }
    }

    /// Remove a sink. Unknown uuids are a logged no-op.
    pub fn remove_sink(&self, uuid: &str) {
        match self.sinks.remove(uuid) {
            Some(_) => tracing::info!(sink = %uuid, "sink removed"),
            None => tracing::info!(sink = %uuid, "ignoring removal of unknown sink"),
        }
    }

    /// Replay persisted descriptors through the normal add paths.
    ///
    /// Safe against overlap with gossip that arrived first: overlapping
    /// uuids become updates, and a bad descriptor only skips itself.
    pub fn add_from_config(&self, sources: &[SourceDescriptor], sinks: &[SinkDescriptor]) {
        for descriptor in sources {
            if let Err(e) = self.add_source(descriptor.clone()) {
                tracing::warn!(name = %descriptor.name, "skipping config source: {e}");
            }
        }
        for descriptor in sinks {
            if let Err(e) = self.add_sink(descriptor.clone()) {
                tracing::warn!(name = %descriptor.name, "skipping config sink: {e}");
            }
        }
    }

    pub fn source_descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .map(|entry| entry.value().descriptor().clone())
            .collect()
    }

    pub fn source_descriptor(&self, uuid: &str) -> Option<SourceDescriptor> {
        self.sources
            .get(uuid)
            .map(|entry| entry.value().descriptor().clone())
    }

    pub fn sink_descriptor(&self, uuid: &str) -> Option<SinkDescriptor> {
        self.sinks
            .get(uuid)
            .map(|entry| entry.value().descriptor().clone())
    }

    pub fn sink_descriptors(&self) -> Vec<SinkDescriptor> {
        self.sinks
            .iter()
            .map(|entry| entry.value().descriptor().clone())
            .collect()
    }

    /// Descriptor plus activity flag, for the management API
    pub fn sources_with_activity(&self) -> Vec<(SourceDescriptor, bool)> {
        self.sources
            .iter()
            .map(|entry| (entry.value().descriptor().clone(), entry.value().is_active()))
            .collect()
    }

    pub fn sinks_with_activity(&self) -> Vec<(SinkDescriptor, bool)> {
        self.sinks
            .iter()
            .map(|entry| (entry.value().descriptor().clone(), entry.value().is_active()))
            .collect()
    }

    /// Flip a source's activity flag; false if the uuid is unknown.
    pub fn set_source_active(&self, uuid: &str, active: bool) -> bool {
        match self.sources.get_mut(uuid) {
            Some(mut source) => {
                source.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Flip a sink's activity flag; false if the uuid is unknown.
    pub fn set_sink_active(&self, uuid: &str, active: bool) -> bool {
        match self.sinks.get_mut(uuid) {
            Some(mut sink) => {
                sink.set_active(active);
                true
            }
            None => false,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    fn find_local_device_sink(&self, device_name: &str) -> Option<String> {
        self.sinks
            .iter()
            .find(|entry| {
                let sink = entry.value();
                sink.is_local()
                    && sink.kind() == SinkKind::LocalDevice
                    && sink.descriptor().device_name.as_deref() == Some(device_name)
            })
            .map(|entry| entry.key().clone())
    }

    fn emit(&self, event: ConfigEvent) {
        if self.config_tx.send(event).is_err() {
            tracing::debug!("config bridge is gone; descriptor not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SourceKind;
    use proptest::prelude::*;

    const LOCAL: &str = "local-peer";

    fn test_registry() -> (EntityRegistry, mpsc::UnboundedReceiver<ConfigEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EntityRegistry::new(LOCAL.to_string(), tx), rx)
    }

    fn null_source(uuid: Option<&str>, name: &str) -> SourceDescriptor {
        SourceDescriptor {
            uuid: uuid.map(str::to_string),
            name: name.to_string(),
            kind: SourceKind::Null,
            peer_uuid: None,
        }
    }

    fn device_sink(uuid: Option<&str>, name: &str, device: &str) -> SinkDescriptor {
        SinkDescriptor {
            uuid: uuid.map(str::to_string),
            name: name.to_string(),
            kind: SinkKind::LocalDevice,
            peer_uuid: None,
            device_name: Some(device.to_string()),
        }
    }

    #[test]
    fn test_add_with_known_uuid_updates_in_place() {
        let (registry, mut events) = test_registry();

        registry.add_source(null_source(Some("s1"), "first")).unwrap();
        registry.add_source(null_source(Some("s1"), "second")).unwrap();

        let descriptors = registry.source_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "second");

        assert!(matches!(
            events.try_recv().unwrap(),
            ConfigEvent::SourceAdded(_)
        ));
        match events.try_recv().unwrap() {
            ConfigEvent::SourceUpdated(d) => assert_eq!(d.name, "second"),
            other => panic!("expected update event, got {other:?}"),
        }
    }

    #[test]
    fn test_device_rescan_matches_by_device_name() {
        let (registry, _events) = test_registry();

        let uuid = registry
            .add_sink(device_sink(Some("d1"), "Speakers", "hw:0"))
            .unwrap();
        assert_eq!(uuid, "d1");

        // rescan does not know the assigned uuid yet
        let uuid = registry
            .add_sink(device_sink(None, "Speakers (default)", "hw:0"))
            .unwrap();
        assert_eq!(uuid, "d1");

        let descriptors = registry.sink_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "Speakers (default)");
        assert_eq!(descriptors[0].uuid.as_deref(), Some("d1"));
    }

    #[test]
    fn test_remove_unknown_is_a_noop() {
        let (registry, _events) = test_registry();
        registry.add_source(null_source(Some("s1"), "keep")).unwrap();

        registry.remove_source("nope");
        registry.remove_sink("nope");
        assert_eq!(registry.source_count(), 1);

        registry.remove_source("s1");
        registry.remove_source("s1");
        assert_eq!(registry.source_count(), 0);
    }

    #[test]
    fn test_config_replay_overlapping_gossip() {
        let (registry, _events) = test_registry();

        // gossip got here first
        registry.add_sink(SinkDescriptor {
            uuid: Some("s1".into()),
            name: "N".into(),
            kind: SinkKind::Null,
            peer_uuid: None,
            device_name: None,
        }).unwrap();

        let from_config = vec![SinkDescriptor {
            uuid: Some("s1".into()),
            name: "N".into(),
            kind: SinkKind::Null,
            peer_uuid: None,
            device_name: None,
        }];
        registry.add_from_config(&[], &from_config);

        assert_eq!(registry.sink_count(), 1);
        assert_eq!(registry.sink_descriptors()[0].uuid.as_deref(), Some("s1"));
    }

    #[test]
    fn test_local_remote_proxy_kind_is_rejected() {
        let (registry, _events) = test_registry();

        let err = registry
            .add_source(SourceDescriptor {
                uuid: None,
                name: "ghost".into(),
                kind: SourceKind::RemoteProxy,
                peer_uuid: None,
            })
            .unwrap_err();
        assert!(matches!(err, EntityError::UnknownKind { .. }));
        assert_eq!(registry.source_count(), 0);
    }

    #[test]
    fn test_remote_descriptor_requires_uuid() {
        let (registry, _events) = test_registry();

        let err = registry
            .add_source(SourceDescriptor {
                uuid: None,
                name: "theirs".into(),
                kind: SourceKind::Librespot,
                peer_uuid: Some("other-peer".into()),
            })
            .unwrap_err();
        assert!(matches!(err, EntityError::MissingUuid { .. }));
    }

    #[test]
    fn test_remote_descriptors_become_proxies_without_config_events() {
        let (registry, mut events) = test_registry();

        registry
            .add_source(SourceDescriptor {
                uuid: Some("r1".into()),
                name: "theirs".into(),
                kind: SourceKind::Librespot,
                peer_uuid: Some("other-peer".into()),
            })
            .unwrap();

        assert_eq!(registry.source_count(), 1);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_local_create_stamps_owner_and_generates_uuid() {
        let (registry, mut events) = test_registry();

        let uuid = registry.add_source(null_source(None, "mine")).unwrap();
        assert!(!uuid.is_empty());

        match events.try_recv().unwrap() {
            ConfigEvent::SourceAdded(d) => {
                assert_eq!(d.uuid.as_deref(), Some(uuid.as_str()));
                assert_eq!(d.peer_uuid.as_deref(), Some(LOCAL));
            }
            other => panic!("expected add event, got {other:?}"),
        }
    }

    proptest! {
        // no sequence of adds may ever yield two entities with one uuid
        #[test]
        fn prop_uuids_stay_unique(ops in proptest::collection::vec((0u8..5, 0u8..3), 1..40)) {
            let (registry, _events) = test_registry();
            for (id, name_idx) in ops {
                let _ = registry.add_source(null_source(
                    Some(&format!("s{id}")),
                    &format!("name-{name_idx}"),
                ));
            }
            let mut uuids: Vec<String> = registry
                .source_descriptors()
                .into_iter()
                .map(|d| d.uuid.unwrap())
                .collect();
            let total = uuids.len();
            uuids.sort();
            uuids.dedup();
            prop_assert_eq!(uuids.len(), total);
        }
    }
}
