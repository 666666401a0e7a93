// error.rs
use thiserror::Error;

/// Failures of the frame codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unparseable frame: {0}")]
    Parse(String),
}

/// Failures reported by a wireless transport or one of its links.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Failed to connect to {device_id}: {reason}")]
    Connect { device_id: String, reason: String },
    #[error("Write to {device_id} failed: {reason}")]
    Write { device_id: String, reason: String },
    #[error("Disconnect from {device_id} failed: {reason}")]
    Disconnect { device_id: String, reason: String },
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Inbound payloads that can't become a device request.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Failures while assembling the bridge at startup.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported link backend: {0}")]
    UnsupportedBackend(String),
    #[error(transparent)]
    Link(#[from] LinkError),
}
