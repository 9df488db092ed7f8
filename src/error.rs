//! Internal error type for the naming server process.
//!
//! Per-request failures never surface as [`NsError`] --- they are reported to
//! the caller as a wire [`crate::wire::ErrorCode`] instead. `NsError` is
//! reserved for conditions that abort startup or a background task: a bad
//! bind, a corrupt registry file, an I/O failure the caller can't be told
//! about because there is no caller (e.g. the heartbeat sweep).

use std::fmt;

/// Errors fatal enough to abort server startup or a background task.
#[derive(Debug)]
pub enum NsError {
    /// Wraps an arbitrary I/O failure.
    Io(std::io::Error),
    /// The listener failed to bind the configured port.
    Bind { port: u16, source: std::io::Error },
    /// The on-disk registry could not be parsed or written.
    Persistence(String),
    /// A peer sent a message that violates the wire protocol.
    Protocol(String),
}

impl fmt::Display for NsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NsError::Io(e) => write!(f, "I/O error: {e}"),
            NsError::Bind { port, source } => write!(f, "failed to bind port {port}: {source}"),
            NsError::Persistence(msg) => write!(f, "persistence error: {msg}"),
            NsError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for NsError {}

impl From<std::io::Error> for NsError {
    fn from(e: std::io::Error) -> Self {
        NsError::Io(e)
    }
}

/// Result alias for fallible naming-server internals.
pub type Result<T> = std::result::Result<T, NsError>;
