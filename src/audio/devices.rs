//! Audio device enumeration
//!
//! The only thing the mesh needs from the sound stack is the list of output
//! devices, expressed as sink descriptors the entity registry can reconcile.
//! Playback itself is the pipeline's business.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::protocol::{SinkDescriptor, SinkKind};

/// Enumerate output devices as device-backed sink descriptors.
///
/// Descriptors carry no uuid; the entity registry reconciles rescans by
/// device name. The default device sorts first.
pub fn scan_output_sinks() -> Vec<SinkDescriptor> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut sinks: Vec<SinkDescriptor> = Vec::new();
    let devices = match host.output_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("output device enumeration failed: {e}");
            return sinks;
        }
    };

    for device in devices {
        let Ok(name) = device.name() else { continue };
        // hosts can report the same device through several configs
        if sinks.iter().any(|s| s.device_name.as_deref() == Some(name.as_str())) {
            continue;
        }
        let descriptor = SinkDescriptor {
            uuid: None,
            name: name.clone(),
            kind: SinkKind::LocalDevice,
            peer_uuid: None,
            device_name: Some(name.clone()),
        };
        if default_name.as_deref() == Some(name.as_str()) {
            sinks.insert(0, descriptor);
        } else {
            sinks.push(descriptor);
        }
    }

    tracing::info!(count = sinks.len(), "output device scan complete");
    sinks
}
