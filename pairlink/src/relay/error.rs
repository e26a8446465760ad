//! Error types for the relay module.

use std::io;
use thiserror::Error;

/// Fatal relay failures surfaced through the process exit code.
///
/// Everything else (peer disconnects, malformed traffic, internal
/// forbidden conditions) is logged and absorbed; the service keeps
/// running in the face of arbitrary peer behavior.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A configured listening endpoint could not be opened.
    #[error("Failed to listen on port {port}")]
    Listen { port: u16 },

    /// Signal handlers could not be installed.
    #[error("Failed to install signal handlers: {0}")]
    Signals(#[from] io::Error),

    /// The socket multiplexer reported a fatal error.
    #[error("Error while serving the listening descriptors")]
    Serve,
}
