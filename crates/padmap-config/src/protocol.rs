//! Control socket protocol
//!
//! Newline-delimited JSON messages exchanged between the CLI (or any other
//! front end) and the daemon over a Unix domain socket. Requests carry a
//! `type` tag:
//!
//! - `{"type": "status"}`
//! - `{"type": "list_devices"}`
//! - `{"type": "set_target", "device": "..."}` (`"device": null` clears)
//! - `{"type": "add_mapping", "source": 30, "target": 59}`
//! - `{"type": "remove_mapping", "source": 30}`
//! - `{"type": "set_enabled", "enabled": true}`
//! - `{"type": "detect"}` / `{"type": "cancel_detect"}`
//! - `{"type": "start"}` / `{"type": "stop"}`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{DeviceId, KeyCode, MappingEntry};

/// Lifecycle state of the remap engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    /// The driver interface for the target device is unavailable (device
    /// unplugged or grab lost). All events pass through until reattachment.
    Degraded,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Requests sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Query engine status
    Status,
    /// Enumerate currently connected keyboard devices
    ListDevices,
    /// Set (or clear) the target device to remap
    SetTarget { device: Option<DeviceId> },
    /// Insert or overwrite a mapping entry
    AddMapping { source: KeyCode, target: KeyCode },
    /// Remove a mapping entry
    RemoveMapping { source: KeyCode },
    /// Toggle whether the mapping table is consulted
    SetEnabled { enabled: bool },
    /// Start a detection session: report the next device a key is pressed on
    Detect,
    /// Cancel an active detection session
    CancelDetect,
    /// Start the remap engine
    Start,
    /// Stop the remap engine
    Stop,
}

/// Responses sent from the daemon back to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Operation completed successfully
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Engine status snapshot
    Status { status: EngineStatus },
    /// Connected keyboard devices
    Devices { devices: Vec<DeviceEntry> },
    /// A detection session resolved to this device
    Detected { device: DeviceId },
    /// The detection session was cancelled before any device was seen
    Cancelled,
    /// Error occurred while processing the request
    Error { message: String },
}

/// Status snapshot of the engine, as reported over the control socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    pub lifecycle: LifecycleState,
    pub target_device: Option<DeviceId>,
    pub enabled: bool,
    pub detecting: bool,
    pub mappings: Vec<MappingEntry>,
}

/// One enumerated keyboard device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: DeviceId,
    pub name: String,
    pub path: PathBuf,
    /// "vvvv:pppp" vendor/product string
    pub vendor_product: String,
}

/// Control socket path: `$XDG_RUNTIME_DIR/padmap.sock`, falling back to
/// `/tmp/padmap-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("padmap.sock")
    } else {
        let uid = unsafe { nix::libc::getuid() };
        PathBuf::from(format!("/tmp/padmap-{}.sock", uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_matches_wire_format() {
        let request = Request::AddMapping {
            source: 30,
            target: 59,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"add_mapping","source":30,"target":59}"#);

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn set_target_clear_uses_null() {
        let request = Request::SetTarget { device: None };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"type":"set_target","device":null}"#);
    }

    #[test]
    fn status_request_round_trip() {
        let json = r#"{"type":"status"}"#;
        let parsed: Request = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, Request::Status);
    }

    #[test]
    fn response_error_round_trip() {
        let response = Response::Error {
            message: "no such device".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"no such device"}"#);

        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn status_response_round_trip() {
        let response = Response::Status {
            status: EngineStatus {
                lifecycle: LifecycleState::Running,
                target_device: Some(DeviceId::new("1209:0001:pad")),
                enabled: true,
                detecting: false,
                mappings: vec![MappingEntry {
                    source: 30,
                    target: 59,
                }],
            },
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""lifecycle":"running""#));

        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn success_without_message_is_compact() {
        let response = Response::Success { message: None };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"type":"success"}"#);
    }
}
