//! # xrm2m Protocol
//!
//! JSON-RPC 2.0 message types, argument lists and the newline-delimited line
//! codec spoken by the IOS-XR `json_rpc_server`.

#![warn(missing_docs)]

/// Request/response message types
pub mod message;

/// Ordered call arguments
pub mod params;

/// Line codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use message::{RemoteErrorKind, Request, Response, RpcError, JSONRPC_VERSION};
pub use params::Params;
pub use codec::LineCodec;
pub use error::ProtocolError;
