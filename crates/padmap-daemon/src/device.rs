//! Device registry: enumeration, stable identity, open-by-id
//!
//! Devices are addressed by a [`DeviceId`] built from vendor/product plus the
//! most stable descriptor the kernel exposes, so the same physical device
//! resolves to the same id across replugs and across `/dev/input/eventN`
//! renumbering.

use std::path::{Path, PathBuf};

use evdev::Device;
use padmap_config::{protocol::DeviceEntry, DeviceId};

use crate::error::EngineError;

/// Information about a connected keyboard-class input device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
}

impl DeviceInfo {
    /// Vendor:product string (e.g. "1209:0001")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }

    /// Human-readable label for logs and listings.
    pub fn display_name(&self) -> String {
        format!("{} [{}]", self.name, self.vendor_product())
    }
}

impl From<DeviceInfo> for DeviceEntry {
    fn from(info: DeviceInfo) -> Self {
        let vendor_product = info.vendor_product();
        DeviceEntry {
            id: info.id,
            name: info.name,
            path: info.path,
            vendor_product,
        }
    }
}

/// Resolve a stable identity for an opened device.
///
/// Descriptor preference: unique name (serial), then physical path (USB
/// topology), then device name. Kernels report empty strings for absent
/// descriptors, so each candidate is filtered for content.
pub fn identify(device: &Device, path: &Path) -> Result<DeviceId, EngineError> {
    let descriptor = [device.unique_name(), device.physical_path(), device.name()]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty());

    let descriptor = descriptor.ok_or_else(|| EngineError::UnknownDevice {
        path: path.to_path_buf(),
    })?;

    let id = device.input_id();
    Ok(DeviceId::new(format!(
        "{:04x}:{:04x}:{}",
        id.vendor(),
        id.product(),
        descriptor
    )))
}

/// Keyboard heuristic: reports KEY events and has an A key. Filters out
/// mice, power buttons and other key-capable non-keyboards.
pub fn is_keyboard(device: &Device) -> bool {
    device.supported_events().contains(evdev::EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(evdev::Key::KEY_A))
            .unwrap_or(false)
}

/// Enumerate all connected keyboard-class devices.
///
/// Devices that cannot be opened or identified are skipped with a debug log
/// rather than failing the whole enumeration.
pub fn enumerate_keyboards() -> Result<Vec<DeviceInfo>, EngineError> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input")? {
        let entry = entry?;
        let path = entry.path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false)
        {
            continue;
        }

        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!("could not open {}: {}", path.display(), e);
                continue;
            }
        };

        if !is_keyboard(&device) {
            continue;
        }

        let id = match identify(&device, &path) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!("skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let input_id = device.input_id();
        devices.push(DeviceInfo {
            id,
            name: device.name().unwrap_or("Unknown").to_string(),
            path,
            vendor: input_id.vendor(),
            product: input_id.product(),
        });
    }

    Ok(devices)
}

/// Open the device currently backing `id`, if it is connected.
pub fn open_by_id(id: &DeviceId) -> Result<Option<(DeviceInfo, Device)>, EngineError> {
    for info in enumerate_keyboards()? {
        if &info.id == id {
            let device = Device::open(&info.path)?;
            return Ok(Some((info, device)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_product_is_lower_hex() {
        let info = DeviceInfo {
            id: DeviceId::new("1209:0001:pad"),
            path: PathBuf::from("/dev/input/event7"),
            name: "Macro Pad".to_string(),
            vendor: 0x1209,
            product: 0x0001,
        };
        assert_eq!(info.vendor_product(), "1209:0001");
        assert_eq!(info.display_name(), "Macro Pad [1209:0001]");
    }

    #[test]
    fn device_entry_carries_identity_through() {
        let info = DeviceInfo {
            id: DeviceId::new("046d:c31c:usb-0000:00:14.0-3/input0"),
            path: PathBuf::from("/dev/input/event3"),
            name: "USB Keyboard".to_string(),
            vendor: 0x046d,
            product: 0xc31c,
        };
        let entry: DeviceEntry = info.into();
        assert_eq!(entry.id.as_str(), "046d:c31c:usb-0000:00:14.0-3/input0");
        assert_eq!(entry.vendor_product, "046d:c31c");
    }
}
