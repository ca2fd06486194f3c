//! Error types for the xrm2m client

use thiserror::Error;
use xrm2m_proto::{ProtocolError, RpcError};
use xrm2m_ssh::TransportError;

/// Main error type for M2M operations
#[derive(Debug, Error)]
pub enum M2mError {
    /// Connection could not be established
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O failure on an established channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or request construction failed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The reply did not have the shape the method returns
    #[error("Can't decode {method} reply: {source}")]
    Decode {
        /// Remote method name
        method: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The router rejected the request
    #[error("Remote error: {0}")]
    Remote(#[from] RpcError),

    /// The channel closed while a reply was outstanding
    #[error("Disconnected while waiting for a reply")]
    Disconnected,

    /// `get_value` matched no paths
    #[error("No paths match {path}")]
    NotFound {
        /// Requested path
        path: String,
    },

    /// `get_value` matched more than one path
    #[error("Multiple paths match {path}")]
    Ambiguous {
        /// Requested path
        path: String,
    },

    /// A chain of calls stopped at `op`
    #[error("{op} failed: {source}")]
    Operation {
        /// Method that latched the error
        op: String,
        /// The latched error
        #[source]
        source: Box<M2mError>,
    },
}

impl M2mError {
    /// The router's error object, if the failure came from the router
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            Self::Remote(err) => Some(err),
            Self::Operation { source, .. } => source.remote(),
            _ => None,
        }
    }
}
