//! Audio sink entities

use crate::error::EntityError;
use crate::protocol::{SinkDescriptor, SinkKind};

/// An audio consumer known to this process
pub struct Sink {
    descriptor: SinkDescriptor,
    local: bool,
    active: bool,
}

impl Sink {
    /// Construct a locally-owned sink, dispatching on the descriptor kind.
    pub(crate) fn new_local(descriptor: SinkDescriptor) -> Result<Self, EntityError> {
        match descriptor.kind {
            SinkKind::LocalDevice | SinkKind::Null => Ok(Self {
                descriptor,
                local: true,
                active: false,
            }),
            SinkKind::RemoteProxy => Err(EntityError::UnknownKind {
                kind: descriptor.kind.to_string(),
            }),
        }
    }

    /// Construct a proxy for a sink owned by another peer.
    pub(crate) fn new_remote(descriptor: SinkDescriptor) -> Self {
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

    pub fn kind(&self) -> SinkKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Whether the sink is currently playing audio
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Driven by the playback pipeline as streams start and stop.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Merge a newer descriptor. The uuid never changes; every other field
    /// takes the incoming value. Returns whether anything changed.
    pub(crate) fn update_info(&mut self, incoming: &SinkDescriptor) -> bool {
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
        if self.descriptor.device_name != incoming.device_name {
            self.descriptor.device_name = incoming.device_name.clone();
            changed = true;
        }
        changed
    }
}
