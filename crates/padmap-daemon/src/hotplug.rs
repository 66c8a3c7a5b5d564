//! Hot-plug monitoring via udev
//!
//! Watches the `input` subsystem and forwards add/remove events for
//! `/dev/input/event*` nodes to the engine, which decides whether they
//! concern the target device.

use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};

/// A device appeared at or vanished from a `/dev/input/event*` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Add { devnode: PathBuf },
    Remove { devnode: PathBuf },
}

/// Spawn the udev monitor task. Events are delivered on `tx`; the task ends
/// when the receiver is dropped or the monitor stream closes.
///
/// The udev handles are not `Send`, so the monitor runs on a dedicated
/// thread that drives the loop on the tokio runtime via `Handle::block_on`.
/// Setup errors are relayed back so startup still fails loudly.
pub fn spawn_monitor(tx: mpsc::Sender<HotplugEvent>) -> Result<()> {
    let handle = tokio::runtime::Handle::current();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

    std::thread::Builder::new()
        .name("padmap-hotplug".into())
        .spawn(move || {
            handle.block_on(async move {
                let setup = || -> Result<AsyncMonitorSocket> {
                    let monitor = MonitorBuilder::new()
                        .context("creating udev monitor")?
                        .match_subsystem("input")
                        .context("filtering udev monitor to input subsystem")?
                        .listen()
                        .context("binding udev monitor socket")?;

                    AsyncMonitorSocket::new(monitor).context("async udev monitor socket")
                };

                let mut socket = match setup() {
                    Ok(socket) => {
                        let _ = ready_tx.send(Ok(()));
                        socket
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                run_monitor(&mut socket, tx).await;
            });
        })
        .context("spawning udev monitor thread")?;

    ready_rx
        .recv()
        .context("udev monitor thread exited during setup")?
}

async fn run_monitor(socket: &mut AsyncMonitorSocket, tx: mpsc::Sender<HotplugEvent>) {
    {
        while let Some(event) = socket.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("udev monitor error: {}", e);
                    continue;
                }
            };

            let Some(devnode) = event.devnode().map(|p| p.to_path_buf()) else {
                continue;
            };

            // Only event nodes carry key events; skip js*, mouse*, by-id links.
            if !devnode
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("event"))
                .unwrap_or(false)
            {
                continue;
            }

            let hotplug = match event.event_type() {
                EventType::Add => HotplugEvent::Add { devnode },
                EventType::Remove => HotplugEvent::Remove { devnode },
                _ => continue,
            };

            if tx.send(hotplug).await.is_err() {
                break;
            }
        }
        tracing::debug!("udev monitor task exiting");
    }
}
