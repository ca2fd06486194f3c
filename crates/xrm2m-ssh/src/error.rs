//! SSH-specific error types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Credentials rejected before any network activity
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Private key file could not be read or parsed
    #[error("Private key {}: {reason}", path.display())]
    KeyFile {
        /// Key file path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// TCP connection failed
    #[error("Can't connect: {0}")]
    Dial(String),

    /// SSH session could not be created or negotiated
    #[error("Can't create session: {0}")]
    Session(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Session channel (stdin/stdout pipes) could not be opened
    #[error("Can't open channel: {0}")]
    Channel(String),

    /// Remote command failed to start
    #[error("Can't start command: {0}")]
    Exec(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Startup preamble could not be consumed
    #[error("Can't read preamble: {0}")]
    Preamble(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Whether the error happened while establishing the connection
    pub fn is_connect_error(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Preamble(_))
    }
}

#[cfg(feature = "ssh2")]
impl TransportError {
    pub(crate) fn session(err: ssh2::Error) -> Self {
        Self::Session(err.to_string())
    }
}
