//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and the process exit code: any error exits with status 1.

use std::fmt;
use std::process;

use pairlink::config::ConfigFileError;
use pairlink::logging::LoggingError;
use pairlink::relay::RelayError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    Logging(LoggingError),
    /// Configuration file error
    Config(ConfigFileError),
    /// Failed to create the socket service
    Socket(std::io::Error),
    /// Relay failed to start or serve
    Relay(RelayError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Relay(RelayError::Listen { port }) = self {
            eprintln!();
            eprintln!("Common issues:");
            eprintln!("  1. Port {} is already in use by another process", port);
            eprintln!("  2. Ports below 1024 need elevated privileges");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Logging(e) => write!(f, "{}", e),
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Socket(e) => write!(f, "Failed to create socket service: {}", e),
            CliError::Relay(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Logging(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Socket(e) => Some(e),
            CliError::Relay(e) => Some(e),
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<RelayError> for CliError {
    fn from(e: RelayError) -> Self {
        CliError::Relay(e)
    }
}
