//! Output injection via a uinput virtual keyboard
//!
//! All re-emitted events, remapped and pass-through alike, leave through one
//! virtual keyboard. The grabbed source device stays silent toward the rest
//! of the system, so a substitution never has to race the original event.

use std::sync::Arc;

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, InputEvent, Key};
use padmap_config::KeyCode;
use tokio::sync::Mutex;

/// Virtual device shared between the filter task and engine teardown.
pub type SharedVirtualDevice = Arc<Mutex<VirtualDevice>>;

/// Create the shared virtual keyboard used for all injected output.
///
/// Fails if /dev/uinput cannot be opened (missing permissions or the uinput
/// module not loaded); the daemon cannot operate without it.
pub fn create_shared_virtual_device(name: &str) -> Result<SharedVirtualDevice> {
    let device = VirtualDevice::new_keyboard(name)?;
    Ok(Arc::new(Mutex::new(device)))
}

/// A uinput virtual keyboard.
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create a virtual keyboard advertising the full key code range, so any
    /// mapping target is emittable without rebuilding the device.
    pub fn new_keyboard(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 0..256u16 {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .build()?;

        Ok(Self { device })
    }

    /// Emit a batch of events.
    pub fn emit(&mut self, events: &[InputEvent]) -> Result<()> {
        self.device.emit(events)?;
        Ok(())
    }

    /// Synthesize a release for a key, with its own SYN report. Used at
    /// teardown to close out presses that were emitted but never released.
    pub fn release_key(&mut self, code: KeyCode) -> Result<()> {
        let release = InputEvent::new(evdev::EventType::KEY, code, 0);
        let syn = InputEvent::new(evdev::EventType::SYNCHRONIZATION, 0, 0);
        self.emit(&[release, syn])?;
        Ok(())
    }
}
