//! Remap engine: lifecycle, shared state, command and event plumbing
//!
//! One engine task owns the filter attachment and the lifecycle state
//! machine (stopped, starting, running, degraded). Execution contexts:
//!
//! - the engine task itself, driving commands, hotplug and filter exits
//!   through a single `select!` loop, so lifecycle transitions are serialized
//! - one filter task per attachment, reading the grabbed target device
//! - detection sessions ([`crate::detect`]), one at a time
//!
//! Shared mutable data is the [`EngineState`] behind a `std::sync::RwLock`:
//! the filter task takes a short read lock per event, command handlers take
//! write locks. Locks are never held across await points.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use evdev::{EventStream, EventType, InputEvent};
use padmap_config::protocol::{EngineStatus, LifecycleState};
use padmap_config::{save_config, Config, DeviceId, KeyCode, MappingTable};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::detect::{self, DetectionHandle};
use crate::device::{self, DeviceInfo};
use crate::error::{EngineError, ErrorKind};
use crate::filter::{FilterCore, RemapView, Transition, Verdict};
use crate::hotplug::HotplugEvent;
use crate::injector::SharedVirtualDevice;

/// Degraded-state reattach interval.
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Mutable engine state shared between the engine task and the filter loop.
#[derive(Debug)]
pub struct EngineState {
    pub target: Option<DeviceId>,
    pub table: MappingTable,
    pub lifecycle: LifecycleState,
    pub detecting: bool,
}

impl EngineState {
    fn from_config(config: Config) -> Self {
        Self {
            target: config.target_device,
            table: config.table,
            lifecycle: LifecycleState::Stopped,
            detecting: false,
        }
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            lifecycle: self.lifecycle,
            target_device: self.target.clone(),
            enabled: self.table.enabled,
            detecting: self.detecting,
            mappings: self.table.entries.clone(),
        }
    }

    fn to_config(&self) -> Config {
        Config {
            target_device: self.target.clone(),
            table: self.table.clone(),
        }
    }
}

pub type SharedState = Arc<RwLock<EngineState>>;

/// Broadcast notifications emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    DeviceDetected(DeviceId),
    DetectionCancelled,
    TargetChanged(Option<DeviceId>),
    MappingChanged(MappingTable),
    LifecycleChanged(LifecycleState),
    EngineError { kind: ErrorKind, detail: String },
}

/// Commands accepted by the engine task.
enum Command {
    Status(oneshot::Sender<EngineStatus>),
    ListDevices(oneshot::Sender<Result<Vec<DeviceInfo>, EngineError>>),
    SetTarget {
        device: Option<DeviceId>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    AddMapping {
        source: KeyCode,
        target: KeyCode,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RemoveMapping {
        source: KeyCode,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StartDetection(oneshot::Sender<Result<(), EngineError>>),
    CancelDetection(oneshot::Sender<Result<(), EngineError>>),
    Start(oneshot::Sender<Result<(), EngineError>>),
    Stop(oneshot::Sender<Result<(), EngineError>>),
}

/// Outcome of a detection session, as seen by [`EngineHandle::detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectOutcome {
    Detected(DeviceId),
    Cancelled,
}

/// Cloneable handle for talking to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ListDevices(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn set_target(&self, device: Option<DeviceId>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetTarget { device, reply: tx }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn add_mapping(&self, source: KeyCode, target: KeyCode) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::AddMapping {
            source,
            target,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn remove_mapping(&self, source: KeyCode) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RemoveMapping { source, reply: tx }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetEnabled { enabled, reply: tx }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn cancel_detect(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CancelDetection(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Start a detection session and wait for its outcome.
    ///
    /// Subscribes before sending the command so the resolution event cannot
    /// be missed.
    pub async fn detect(&self) -> Result<DetectOutcome, EngineError> {
        let mut events = self.events.subscribe();

        let (tx, rx) = oneshot::channel();
        self.send(Command::StartDetection(tx)).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)??;

        loop {
            match events.recv().await {
                Ok(EngineEvent::DeviceDetected(id)) => return Ok(DetectOutcome::Detected(id)),
                Ok(EngineEvent::DetectionCancelled) => return Ok(DetectOutcome::Cancelled),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(EngineError::ChannelClosed),
            }
        }
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// A running filter attachment.
struct FilterHandle {
    devnode: PathBuf,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// How a filter task ended.
#[derive(Debug)]
enum FilterExit {
    /// Shut down on request.
    Clean,
    /// The device read failed (unplugged, grab revoked).
    DriverLost(String),
}

pub struct Engine {
    state: SharedState,
    config_path: PathBuf,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<EngineEvent>,
    virtual_device: SharedVirtualDevice,
    hotplug: mpsc::Receiver<HotplugEvent>,
    filter: Option<FilterHandle>,
    filter_exit_tx: mpsc::Sender<FilterExit>,
    filter_exit_rx: mpsc::Receiver<FilterExit>,
    detection: Option<DetectionHandle>,
}

impl Engine {
    /// Spawn the engine task. The returned handle is the only way to drive
    /// it; the task ends when every handle clone is dropped.
    pub fn spawn(
        config: Config,
        config_path: PathBuf,
        virtual_device: SharedVirtualDevice,
        hotplug: mpsc::Receiver<HotplugEvent>,
    ) -> EngineHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(64);
        let (filter_exit_tx, filter_exit_rx) = mpsc::channel(4);

        let engine = Engine {
            state: Arc::new(RwLock::new(EngineState::from_config(config))),
            config_path,
            commands: command_rx,
            events: event_tx.clone(),
            virtual_device,
            hotplug,
            filter: None,
            filter_exit_tx,
            filter_exit_rx,
            detection: None,
        };

        tokio::spawn(engine.run());

        EngineHandle {
            commands: command_tx,
            events: event_tx,
        }
    }

    async fn run(mut self) {
        let mut retry = tokio::time::interval(RETRY_INTERVAL);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let degraded = self.lifecycle() == LifecycleState::Degraded;
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                Some(exit) = self.filter_exit_rx.recv() => {
                    self.handle_filter_exit(exit).await;
                }
                Some(event) = self.hotplug.recv() => {
                    self.handle_hotplug(event).await;
                }
                _ = retry.tick(), if degraded => {
                    tracing::debug!("degraded, retrying target attachment");
                    self.attach_target().await;
                }
            }
        }

        self.teardown_filter().await;
        tracing::debug!("engine task exiting");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Status(reply) => {
                let status = self.read_state(|s| s.status());
                let _ = reply.send(status);
            }
            Command::ListDevices(reply) => {
                let _ = reply.send(device::enumerate_keyboards());
            }
            Command::SetTarget { device, reply } => {
                match &device {
                    Some(id) => tracing::info!("target device set to {}", id),
                    None => tracing::info!("target device cleared"),
                }
                self.write_state(|s| s.target = device.clone());
                self.persist();
                let _ = self.events.send(EngineEvent::TargetChanged(device));
                if self.lifecycle() != LifecycleState::Stopped {
                    self.attach_target().await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::AddMapping {
                source,
                target,
                reply,
            } => {
                let replaced = self.write_state(|s| s.table.add(source, target));
                if replaced {
                    // Duplicate source: last write wins, worth surfacing.
                    tracing::info!("mapping for key {} replaced, now -> {}", source, target);
                } else {
                    tracing::debug!("mapping added: {} -> {}", source, target);
                }
                self.persist();
                self.broadcast_table();
                let _ = reply.send(Ok(()));
            }
            Command::RemoveMapping { source, reply } => {
                let removed = self.write_state(|s| s.table.remove(source));
                if !removed {
                    tracing::debug!("remove for unmapped key {} ignored", source);
                }
                self.persist();
                self.broadcast_table();
                let _ = reply.send(Ok(()));
            }
            Command::SetEnabled { enabled, reply } => {
                tracing::info!("mapping table {}", if enabled { "enabled" } else { "disabled" });
                self.write_state(|s| s.table.set_enabled(enabled));
                self.persist();
                self.broadcast_table();
                let _ = reply.send(Ok(()));
            }
            Command::StartDetection(reply) => {
                let result = self.start_detection();
                let _ = reply.send(result);
            }
            Command::CancelDetection(reply) => {
                let result = self.cancel_detection();
                let _ = reply.send(result);
            }
            Command::Start(reply) => {
                self.set_lifecycle(LifecycleState::Starting);
                self.attach_target().await;
                let _ = reply.send(Ok(()));
            }
            Command::Stop(reply) => {
                self.teardown_filter().await;
                self.set_lifecycle(LifecycleState::Stopped);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn start_detection(&mut self) -> Result<(), EngineError> {
        if self.read_state(|s| s.detecting) {
            return Err(EngineError::DetectionActive);
        }
        let handle = detect::spawn(self.state.clone(), self.events.clone())?;
        self.write_state(|s| s.detecting = true);
        self.detection = Some(handle);
        tracing::info!("detection session started");
        Ok(())
    }

    fn cancel_detection(&mut self) -> Result<(), EngineError> {
        if !self.read_state(|s| s.detecting) {
            return Err(EngineError::NoDetectionSession);
        }
        if let Some(handle) = self.detection.take() {
            handle.cancel();
        }
        Ok(())
    }

    /// (Re)attach the filter to the configured target device.
    ///
    /// No target means nothing to filter; the engine runs with every device
    /// untouched. Failure to open or grab the target degrades the engine
    /// rather than failing it: input keeps flowing, unremapped.
    async fn attach_target(&mut self) {
        self.teardown_filter().await;

        let Some(target) = self.read_state(|s| s.target.clone()) else {
            self.set_lifecycle(LifecycleState::Running);
            tracing::info!("engine running with no target device configured");
            return;
        };

        let (info, mut device) = match device::open_by_id(&target) {
            Ok(Some(found)) => found,
            Ok(None) => {
                self.degrade(
                    ErrorKind::UnknownDevice,
                    format!("target device {} not connected", target),
                );
                return;
            }
            Err(e) => {
                self.degrade(
                    ErrorKind::DriverUnavailable,
                    format!("enumerating devices: {}", e),
                );
                return;
            }
        };

        if let Err(e) = device.grab() {
            self.degrade(
                ErrorKind::DriverUnavailable,
                format!("grabbing {}: {}", info.path.display(), e),
            );
            return;
        }

        let stream = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                self.degrade(
                    ErrorKind::DriverUnavailable,
                    format!("event stream for {}: {}", info.path.display(), e),
                );
                return;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_filter(
            stream,
            target.clone(),
            self.state.clone(),
            self.virtual_device.clone(),
            self.events.clone(),
            shutdown_rx,
            self.filter_exit_tx.clone(),
        ));

        self.filter = Some(FilterHandle {
            devnode: info.path.clone(),
            shutdown: shutdown_tx,
            task,
        });

        self.set_lifecycle(LifecycleState::Running);
        tracing::info!(
            "filtering {} at {}",
            info.display_name(),
            info.path.display()
        );
    }

    async fn teardown_filter(&mut self) {
        if let Some(filter) = self.filter.take() {
            let _ = filter.shutdown.send(true);
            let _ = filter.task.await;
            // Drain the exit notification so it is not misread later.
            let _ = self.filter_exit_rx.try_recv();
        }
    }

    async fn handle_filter_exit(&mut self, exit: FilterExit) {
        if let Some(filter) = self.filter.take() {
            let _ = filter.task.await;
        }
        let next = lifecycle_on_filter_exit(self.lifecycle(), &exit);
        if let FilterExit::DriverLost(detail) = &exit {
            tracing::warn!("filter lost target device: {}", detail);
            let _ = self.events.send(EngineEvent::EngineError {
                kind: ErrorKind::DriverUnavailable,
                detail: detail.clone(),
            });
        }
        self.set_lifecycle(next);
    }

    async fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Add { devnode } => {
                tracing::debug!("input device added: {}", devnode.display());
                let unattached = self.filter.is_none();
                let has_target = self.read_state(|s| s.target.is_some());
                if unattached && has_target && self.lifecycle() != LifecycleState::Stopped {
                    self.attach_target().await;
                }
            }
            HotplugEvent::Remove { devnode } => {
                let attached = self
                    .filter
                    .as_ref()
                    .map(|f| f.devnode == devnode)
                    .unwrap_or(false);
                if attached {
                    tracing::warn!("target device removed: {}", devnode.display());
                    self.teardown_filter().await;
                    self.degrade(
                        ErrorKind::DriverUnavailable,
                        format!("device at {} removed", devnode.display()),
                    );
                }
            }
        }
    }

    fn degrade(&mut self, kind: ErrorKind, detail: String) {
        tracing::warn!("degraded: {}", detail);
        let _ = self.events.send(EngineEvent::EngineError { kind, detail });
        self.set_lifecycle(LifecycleState::Degraded);
    }

    fn set_lifecycle(&mut self, next: LifecycleState) {
        let changed = self.write_state(|s| {
            let changed = s.lifecycle != next;
            s.lifecycle = next;
            changed
        });
        if changed {
            tracing::info!("lifecycle: {}", next);
            let _ = self.events.send(EngineEvent::LifecycleChanged(next));
        }
    }

    fn lifecycle(&self) -> LifecycleState {
        self.read_state(|s| s.lifecycle)
    }

    fn broadcast_table(&self) {
        let table = self.read_state(|s| s.table.clone());
        let _ = self.events.send(EngineEvent::MappingChanged(table));
    }

    /// Persist target and table. Failure is logged, never fatal; the running
    /// state is authoritative.
    fn persist(&self) {
        let config = self.read_state(|s| s.to_config());
        if let Err(e) = save_config(&self.config_path, &config) {
            tracing::warn!("could not persist configuration: {}", e);
        }
    }

    fn read_state<T>(&self, f: impl FnOnce(&EngineState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    fn write_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

/// Lifecycle transition for a filter exit. Only an unrequested driver loss
/// degrades; a requested shutdown leaves the lifecycle to the caller.
fn lifecycle_on_filter_exit(current: LifecycleState, exit: &FilterExit) -> LifecycleState {
    match exit {
        FilterExit::Clean => current,
        FilterExit::DriverLost(_) => match current {
            LifecycleState::Running | LifecycleState::Starting => LifecycleState::Degraded,
            other => other,
        },
    }
}

/// The filter task: reads the grabbed target device, applies the per-event
/// verdict, re-emits through the virtual device.
///
/// Non-key events (SYN reports, MSC scan codes, LEDs) are forwarded
/// verbatim; the grab consumes everything, so everything must be re-emitted.
/// Injection failures drop that one event without retry and keep the loop
/// alive. On exit, synthetic releases close out any keys still held through
/// the virtual device, and the source device is ungrabbed.
async fn run_filter(
    mut stream: EventStream,
    origin: DeviceId,
    state: SharedState,
    virtual_device: SharedVirtualDevice,
    events: broadcast::Sender<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
    exit: mpsc::Sender<FilterExit>,
) {
    let mut core = FilterCore::new();

    let outcome = loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break FilterExit::Clean,
            event = stream.next_event() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(e) => break FilterExit::DriverLost(e.to_string()),
        };

        let out = if event.event_type() == EventType::KEY {
            match Transition::from_value(event.value()) {
                Some(transition) => {
                    let verdict = {
                        let state = state.read().unwrap_or_else(|e| e.into_inner());
                        let view = RemapView {
                            target: state.target.as_ref(),
                            table: &state.table,
                        };
                        core.process(&view, &origin, event.code(), transition)
                    };
                    match verdict {
                        Verdict::Pass => event,
                        Verdict::Substitute(code) => {
                            InputEvent::new(EventType::KEY, code, event.value())
                        }
                    }
                }
                None => event,
            }
        } else {
            event
        };

        let result = {
            let mut vd = virtual_device.lock().await;
            vd.emit(&[out])
        };
        if let Err(e) = result {
            tracing::error!("injection failed for key {}: {}", out.code(), e);
            let _ = events.send(EngineEvent::EngineError {
                kind: ErrorKind::InjectionFailure,
                detail: e.to_string(),
            });
        }
    };

    // Close out held keys so nothing stays logically pressed downstream.
    let held = core.drain_held();
    if !held.is_empty() {
        tracing::debug!("releasing {} held key(s) on filter exit", held.len());
        let mut vd = virtual_device.lock().await;
        for code in held {
            if let Err(e) = vd.release_key(code) {
                tracing::warn!("could not synthesize release for key {}: {}", code, e);
            }
        }
    }

    // Best effort; the device may already be gone.
    let _ = stream.device_mut().ungrab();

    let _ = exit.send(outcome).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_loss_degrades_a_running_engine() {
        let exit = FilterExit::DriverLost("device unplugged".to_string());
        assert_eq!(
            lifecycle_on_filter_exit(LifecycleState::Running, &exit),
            LifecycleState::Degraded
        );
        assert_eq!(
            lifecycle_on_filter_exit(LifecycleState::Starting, &exit),
            LifecycleState::Degraded
        );
    }

    #[test]
    fn driver_loss_after_stop_stays_stopped() {
        let exit = FilterExit::DriverLost("device unplugged".to_string());
        assert_eq!(
            lifecycle_on_filter_exit(LifecycleState::Stopped, &exit),
            LifecycleState::Stopped
        );
    }

    #[test]
    fn clean_exit_preserves_lifecycle() {
        for state in [
            LifecycleState::Stopped,
            LifecycleState::Starting,
            LifecycleState::Running,
            LifecycleState::Degraded,
        ] {
            assert_eq!(lifecycle_on_filter_exit(state, &FilterExit::Clean), state);
        }
    }

    #[test]
    fn status_snapshot_reflects_state() {
        let mut config = Config::default();
        config.table.add(30, 59);
        let mut state = EngineState::from_config(config);
        state.lifecycle = LifecycleState::Degraded;
        state.detecting = true;

        let status = state.status();
        assert_eq!(status.lifecycle, LifecycleState::Degraded);
        assert!(status.detecting);
        assert!(status.enabled);
        assert_eq!(status.mappings.len(), 1);
        assert_eq!(status.target_device, None);
    }

    #[test]
    fn config_round_trips_through_state() {
        let config = Config {
            target_device: Some(DeviceId::new("1209:0001:pad")),
            table: {
                let mut t = MappingTable::default();
                t.add(30, 59);
                t.set_enabled(false);
                t
            },
        };
        let state = EngineState::from_config(config.clone());
        assert_eq!(state.to_config(), config);
    }
}
