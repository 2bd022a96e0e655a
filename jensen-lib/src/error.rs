use std::io;
use thiserror::Error;

/// The primary error type for the `jensen-lib` client.
///
/// Variants correspond one-to-one with the error kinds in the protocol
/// design: each carries the information a caller needs to decide whether to
/// retry, surface to the user, or let auto-reconnect take over.
#[derive(Error, Debug)]
pub enum JensenError {
    #[error("no Jensen device found matching the configured vendor/product filters")]
    DeviceNotFound,

    #[error("permission denied opening USB device")]
    PermissionDenied,

    #[error("device is busy (already claimed by another process)")]
    DeviceBusy,

    #[error("USB transport error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("command issued while device not connected")]
    NotConnected,

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("endpoint stalled and could not be recovered")]
    TransportStalled,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation cancelled. Carries whatever partial result had already
    /// accumulated at the point of cancellation (empty when nothing had);
    /// a streaming accumulator like [`crate::download::download_file`]
    /// returns what it had rather than discarding it.
    #[error("operation cancelled")]
    Cancelled(Vec<u8>),
}

impl From<tokio::time::error::Elapsed> for JensenError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        JensenError::Timeout
    }
}

impl JensenError {
    /// True for errors a caller may reasonably retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JensenError::Timeout | JensenError::ConnectionLost(_))
    }
}
