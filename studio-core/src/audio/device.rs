//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Whether a device captures or plays audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
}

/// Default devices first, then by name.
pub fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// List available microphones. Empty when built without `audio-cpal`.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    list(DeviceDirection::Input)
}

/// List available speakers. Empty when built without `audio-cpal`.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    list(DeviceDirection::Output)
}

#[cfg(feature = "audio-cpal")]
fn list(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices(),
        ),
        DeviceDirection::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices(),
        ),
    };

    let devices = match devices {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!(?direction, "failed to enumerate devices: {e}");
            return Vec::new();
        }
    };

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                direction,
            }
        })
        .collect::<Vec<_>>();
    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
fn list(_direction: DeviceDirection) -> Vec<DeviceInfo> {
    Vec::new()
}
