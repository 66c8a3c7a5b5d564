//! Device detection session
//!
//! "Press a key on the device you want" flow: open every connected keyboard
//! read-only (no grab, so the active filter keeps working), and report the
//! first device a key press arrives on. At most one session runs at a time;
//! the engine enforces that before calling [`spawn`].

use padmap_config::DeviceId;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::device;
use crate::engine::{EngineEvent, SharedState};
use crate::error::EngineError;

/// Handle to a running detection session.
pub struct DetectionHandle {
    cancel: watch::Sender<bool>,
}

impl DetectionHandle {
    /// Cancel the session. The `DetectionCancelled` event follows once the
    /// reader tasks have been torn down.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Start a detection session over all currently connected keyboards.
///
/// The session resolves with a `DeviceDetected` event on the first key press
/// seen, or `DetectionCancelled`. Either way it clears the shared detecting
/// flag before emitting the event.
pub fn spawn(
    state: SharedState,
    events: broadcast::Sender<EngineEvent>,
) -> Result<DetectionHandle, EngineError> {
    let keyboards = device::enumerate_keyboards()?;
    if keyboards.is_empty() {
        return Err(EngineError::DriverUnavailable(
            "no keyboard devices available for detection".to_string(),
        ));
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (hit_tx, mut hit_rx) = mpsc::channel::<DeviceId>(1);

    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(keyboards.len());
    for info in keyboards {
        let device = match evdev::Device::open(&info.path) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!("detection: could not open {}: {}", info.path.display(), e);
                continue;
            }
        };
        let mut stream = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("detection: no event stream for {}: {}", info.path.display(), e);
                continue;
            }
        };

        let hit_tx = hit_tx.clone();
        let id = info.id.clone();
        readers.push(tokio::spawn(async move {
            loop {
                match stream.next_event().await {
                    Ok(event) => {
                        if event.event_type() == evdev::EventType::KEY && event.value() == 1 {
                            let _ = hit_tx.send(id).await;
                            break;
                        }
                    }
                    // Device went away mid-session; this reader just stops.
                    Err(_) => break,
                }
            }
        }));
    }
    drop(hit_tx);

    tokio::spawn(async move {
        let mut cancel_rx = cancel_rx;
        let outcome = tokio::select! {
            _ = cancel_rx.changed() => None,
            hit = hit_rx.recv() => hit,
        };

        for reader in &readers {
            reader.abort();
        }

        {
            let mut state = state.write().unwrap_or_else(|e| e.into_inner());
            state.detecting = false;
        }

        match outcome {
            Some(id) => {
                tracing::info!("detection resolved to {}", id);
                let _ = events.send(EngineEvent::DeviceDetected(id));
            }
            None => {
                tracing::info!("detection session cancelled");
                let _ = events.send(EngineEvent::DetectionCancelled);
            }
        }
    });

    Ok(DetectionHandle { cancel: cancel_tx })
}
