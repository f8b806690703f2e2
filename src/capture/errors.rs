//! Error types for capture operations.
//!
//! [`BackendError`] is what a backend reports; [`CaptureError`] is what the
//! capture handle reports to its caller.

use std::time::Duration;

use thiserror::Error;

use super::types::CaptureState;

/// Errors reported by a capture backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// No source with this name exists
    #[error("capture source '{0}' not found")]
    SourceNotFound(String),
    /// The OS or backend refused access to the source
    #[error("permission denied for capture source '{0}'")]
    PermissionDenied(String),
    /// The backend itself cannot be reached or initialized
    #[error("capture backend unavailable: {0}")]
    Unavailable(String),
    /// A single pull failed; the stream may recover
    #[error("transient capture error: {0}")]
    Transient(String),
    /// The stream is gone for good
    #[error("capture stream disconnected")]
    Disconnected,
    /// The backend handed over a frame that cannot be normalized
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Errors that can occur while operating a capture handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture source name is empty")]
    EmptyName,

    #[error("failed to launch capture of '{name}': {source}")]
    LaunchFailed {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("launch of '{name}' timed out after {timeout:?}")]
    LaunchTimeout { name: String, timeout: Duration },

    #[error("launch of '{0}' was cancelled by release")]
    LaunchCancelled(String),

    #[error("a launch of '{0}' is already in progress")]
    LaunchInProgress(String),

    #[error("no frame available yet")]
    NoFrameAvailable,

    #[error("cannot {operation} a capture in state {state}")]
    InvalidState {
        state: CaptureState,
        operation: &'static str,
    },
}

impl CaptureError {
    /// Whether the error is part of normal polling rather than a failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::NoFrameAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        assert_eq!(
            BackendError::SourceNotFound("monitor-7".to_string()).to_string(),
            "capture source 'monitor-7' not found"
        );
        assert_eq!(
            BackendError::Disconnected.to_string(),
            "capture stream disconnected"
        );
    }

    #[test]
    fn test_launch_failed_carries_source() {
        let err = CaptureError::LaunchFailed {
            name: "monitor-7".to_string(),
            source: BackendError::SourceNotFound("monitor-7".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("monitor-7"));
        assert!(msg.contains("not found"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_state_display() {
        let err = CaptureError::InvalidState {
            state: CaptureState::Released,
            operation: "launch",
        };
        assert_eq!(err.to_string(), "cannot launch a capture in state released");
    }

    #[test]
    fn test_no_frame_is_transient() {
        assert!(CaptureError::NoFrameAvailable.is_transient());
        assert!(!CaptureError::EmptyName.is_transient());
    }
}
