//! Audio source entities

use crate::error::EntityError;
use crate::protocol::{SourceDescriptor, SourceKind};

/// An audio producer known to this process
///
/// Local sources run their pipeline here; remote ones are proxies for a
/// stream owned by another peer.
pub struct Source {
    descriptor: SourceDescriptor,
    local: bool,
    active: bool,
}

impl Source {
    /// Construct a locally-owned source, dispatching on the descriptor kind.
    pub(crate) fn new_local(descriptor: SourceDescriptor) -> Result<Self, EntityError> {
        match descriptor.kind {
            SourceKind::Librespot | SourceKind::Null => Ok(Self {
                descriptor,
                local: true,
                active: false,
            }),
            // a proxy stands in for another peer's stream; it can never be
            // the concrete implementation of a local descriptor
            SourceKind::RemoteProxy => Err(EntityError::UnknownKind {
                kind: descriptor.kind.to_string(),
            }),
        }
    }

    /// Construct a proxy for a source owned by another peer.
    pub(crate) fn new_remote(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            local: false,
            active: false,
        }
    }

    pub fn uuid(&self) -> &str {
        self.descriptor.uuid.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> SourceKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Whether the source is currently producing audio
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Driven by the playback pipeline as streams start and stop.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Merge a newer descriptor. The uuid never changes; every other field
    /// takes the incoming value. Returns whether anything changed.
    pub(crate) fn update_info(&mut self, incoming: &SourceDescriptor) -> bool {
        let mut changed = false;
        if self.descriptor.name != incoming.name {
            self.descriptor.name = incoming.name.clone();
            changed = true;
        }
        if self.descriptor.kind != incoming.kind {
            self.descriptor.kind = incoming.kind;
            changed = true;
        }
        if self.descriptor.peer_uuid != incoming.peer_uuid {
            self.descriptor.peer_uuid = incoming.peer_uuid.clone();
            changed = true;
        }
        changed
    }
}
