//! # xrm2m SSH Transport
//!
//! Session transport for the IOS-XR M2M API: an authenticated SSH command
//! channel exposed as a duplex byte stream that only opens once the remote
//! command's startup preamble has been consumed.

#![warn(missing_docs)]

/// Ready-gated transport and configuration
pub mod transport;

/// SSH connection management
#[cfg(feature = "ssh2")]
pub mod connection;

/// Credentials and auth method selection
pub mod auth;

/// SSH-specific error types
pub mod error;

pub use transport::{
    parse_target, ByteStream, Link, Preamble, Readiness, SessionTransport, SshConfig,
    DEFAULT_COMMAND,
};
#[cfg(feature = "ssh2")]
pub use connection::SshChannel;
pub use auth::{auth_methods, AuthMethod, Credentials};
pub use error::TransportError;
