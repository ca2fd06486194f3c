//! # xrm2m
//!
//! Client for the IOS-XR M2M management API.
//!
//! The router runs `json_rpc_server` as an SSH command; [`M2mClient`] speaks
//! JSON-RPC to it with one typed method per API call and latch-once error
//! handling.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use xrm2m_proto as proto;
pub use xrm2m_ssh as ssh;

/// Error types for the client
pub mod error;

/// JSON-RPC round trips
pub mod rpc;

/// Typed client
pub mod client;

/// Client configuration
pub mod builder;

pub use error::M2mError;
pub use rpc::RpcChannel;
pub use client::{M2mClient, Object, Rows};
#[cfg(feature = "ssh2")]
pub use client::SshClient;
pub use builder::ClientBuilder;
pub use xrm2m_ssh::{Credentials, Preamble, SessionTransport, SshConfig};

/// Result type alias for M2M operations
pub type Result<T> = std::result::Result<T, M2mError>;
