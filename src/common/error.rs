//! Error types for the session host
//!
//! Most failures in this crate are logged and absorbed; the ones that reach
//! a client travel as a [`WireError`] inside a `request-failed` or
//! `delivery-failed` event.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the session host
#[derive(Error, Debug)]
pub enum Error {
    // === Daemon/Connection Errors ===
    #[error("Daemon not running. Any session command starts it on demand")]
    DaemonNotRunning,

    #[error("Failed to start session host: no answer after {0} seconds")]
    DaemonSpawnTimeout(u64),

    #[error("Failed to connect to daemon: {0}")]
    DaemonConnectionFailed(#[source] io::Error),

    #[error("Daemon communication error: {0}")]
    DaemonCommunication(String),

    // === Transport Errors ===
    #[error("No connected channel for {recipient}")]
    NotConnected { recipient: String },

    #[error("Channel to {recipient} is closed")]
    ChannelClosed { recipient: String },

    // === Session Errors ===
    #[error("Session for project '{project}' has been disposed")]
    SessionDisposed { project: String },

    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: u32 },

    #[error("Invalid position '{0}'. Expected uri:line:character")]
    InvalidPosition(String),

    #[error("Invalid breakpoint location '{0}'. Expected file:line")]
    InvalidLocation(String),

    // === Request Errors ===
    #[error("Request timed out after {0} seconds")]
    RequestTimeout(u64),

    #[error("Request was cancelled before a response arrived")]
    RequestCancelled,

    #[error("{kind} request failed: {message}")]
    RequestFailed { kind: String, message: String },

    // === Offline Queue Errors ===
    #[error("Failed to queue message for '{user}': {message}")]
    QueueWrite { user: String, message: String },

    #[error("Failed to read queued messages for '{user}': {message}")]
    QueueRead { user: String, message: String },

    #[error("Queue backend unavailable: {0}")]
    QueueBackend(String),

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-connected error for a recipient
    pub fn not_connected(recipient: impl std::fmt::Display) -> Self {
        Self::NotConnected {
            recipient: recipient.to_string(),
        }
    }

    /// Create a channel-closed error for a recipient
    pub fn channel_closed(recipient: impl std::fmt::Display) -> Self {
        Self::ChannelClosed {
            recipient: recipient.to_string(),
        }
    }

    /// Create a session disposed error
    pub fn session_disposed(project: &str) -> Self {
        Self::SessionDisposed {
            project: project.to_string(),
        }
    }

    /// Create a request failed error
    pub fn request_failed(kind: &str, message: &str) -> Self {
        Self::RequestFailed {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a queue write error
    pub fn queue_write(user: &str, message: impl std::fmt::Display) -> Self {
        Self::QueueWrite {
            user: user.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a queue read error
    pub fn queue_read(user: &str, message: impl std::fmt::Display) -> Self {
        Self::QueueRead {
            user: user.to_string(),
            message: message.to_string(),
        }
    }
}

/// Serializable error carried in failure events
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl WireError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<&Error> for WireError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            Error::NotConnected { .. } => "NOT_CONNECTED",
            Error::ChannelClosed { .. } => "CHANNEL_CLOSED",
            Error::SessionDisposed { .. } => "SESSION_DISPOSED",
            Error::BreakpointNotFound { .. } => "BREAKPOINT_NOT_FOUND",
            Error::InvalidPosition(_) | Error::InvalidLocation(_) => "INVALID_POSITION",
            Error::RequestTimeout(_) => "REQUEST_TIMEOUT",
            Error::RequestCancelled => "REQUEST_CANCELLED",
            Error::RequestFailed { .. } => "REQUEST_FAILED",
            Error::QueueWrite { .. } | Error::QueueRead { .. } | Error::QueueBackend(_) => {
                "QUEUE_UNAVAILABLE"
            }
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        // Map wire errors back to our error types where possible
        match e.code.as_str() {
            "REQUEST_TIMEOUT" => Error::RequestTimeout(0),
            "REQUEST_CANCELLED" => Error::RequestCancelled,
            "REQUEST_FAILED" => Error::request_failed("backend", &e.message),
            _ => Error::DaemonCommunication(e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(WireError::from(&Error::RequestTimeout(30)).code, "REQUEST_TIMEOUT");
        assert_eq!(
            WireError::from(&Error::session_disposed("demo")).code,
            "SESSION_DISPOSED"
        );
        assert_eq!(
            WireError::from(&Error::queue_write("u1", "connection refused")).code,
            "QUEUE_UNAVAILABLE"
        );
        assert_eq!(
            WireError::from(&Error::Internal("boom".into())).code,
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_unknown_wire_codes_keep_their_message() {
        let err = Error::from(WireError::new("HANDSHAKE_REQUIRED", "say hello first"));
        assert!(matches!(&err, Error::DaemonCommunication(m) if m == "say hello first"));
    }

    #[test]
    fn test_wire_error_round_trip_keeps_timeout() {
        let wire = WireError::from(&Error::RequestTimeout(5));
        assert!(matches!(Error::from(wire), Error::RequestTimeout(_)));
    }
}
