//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A line that is not valid JSON-RPC
    #[error("Malformed JSON received: {line:?}")]
    MalformedJson {
        /// The offending line
        line: String,
        /// Parser error text
        reason: String,
    },

    /// Line too large
    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong {
        /// Bytes buffered without a line terminator
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// The same argument name was given twice in one call
    #[error("Duplicate argument name: {0}")]
    DuplicateArgument(String),

    /// A response arrived for a request that was never sent
    #[error("Received response with unexpected ID {got} (expected {expected})")]
    UnexpectedResponseId {
        /// ID of the outstanding request
        expected: u64,
        /// ID carried by the response
        got: u64,
    },

    /// I/O error while reading or writing a line
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}
