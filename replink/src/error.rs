//! Error types for replink.

use std::io;
use thiserror::Error;

/// Result type for replink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for replink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No transport can handle the selected device.
    #[error("No usable transport for device: {0}")]
    NoDriver(String),

    /// Opening the OS-level device handle failed.
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    /// The platform refused access to the device.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A bounded read or write did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation requires an open connection.
    #[error("Device not connected")]
    NotConnected,

    /// Script project storage error.
    #[error("Project error: {0}")]
    Project(String),
}

impl Error {
    /// Classify an I/O failure from the transport, folding timeouts into
    /// [`Error::Timeout`] so callers can tell a stalled board from a dead one.
    pub(crate) fn from_transport(context: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            Self::Timeout(format!("{context}: write did not complete in time"))
        } else {
            Self::Io(err)
        }
    }
}
