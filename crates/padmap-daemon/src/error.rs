//! Engine error taxonomy
//!
//! Every failure mode inside the filter loop is non-fatal to the loop; the
//! engine's default on any internal failure is pass-through (fail-open), so
//! base keyboard function is never lost to a remapping problem.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification attached to outward engine-error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Origin resolution failed; the event was passed through unmodified.
    UnknownDevice,
    /// The driver interface for the target device cannot be opened or read.
    DriverUnavailable,
    /// Writing a substitute event failed; the event was not retried.
    InjectionFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnknownDevice => "unknown_device",
            ErrorKind::DriverUnavailable => "driver_unavailable",
            ErrorKind::InjectionFailure => "injection_failure",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not resolve a stable identity for device at {path}")]
    UnknownDevice { path: PathBuf },

    #[error("driver interface unavailable: {0}")]
    DriverUnavailable(String),

    #[error("a detection session is already active")]
    DetectionActive,

    #[error("no detection session active")]
    NoDetectionSession,

    #[error("engine command channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
