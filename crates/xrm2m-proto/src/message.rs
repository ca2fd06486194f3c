//! Request/response message types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Protocol version carried in every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code the server uses for every M2M API error
pub const M2M_ERROR_CODE: i64 = -32000;

/// JSON-RPC request object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Request ID for correlation
    pub id: u64,
    /// Remote method name
    pub method: String,
    /// Named parameters
    pub params: Map<String, Value>,
}

impl Request {
    /// Create a request for `method` with the given parameter object
    pub fn new(id: u64, method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version echoed by the server
    #[serde(default)]
    pub jsonrpc: String,
    /// Request ID this responds to
    pub id: u64,
    /// Result value; `null` when the method returns nothing
    #[serde(default)]
    pub result: Value,
    /// Error object, present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Value::Null,
            error: Some(error),
        }
    }

    /// Split into the result or the error object
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// Error object returned by the server
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RpcError {
    /// JSON-RPC error code
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Structured details; shape depends on the error type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Classes of error the M2M server reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Generic error raised by the router
    Cisco,
    /// The value's datatype cannot be handled by the API
    DatatypeNotSupported,
    /// `write_file` target already exists
    FileExists,
    /// An argument was rejected
    InvalidArgument,
    /// Nothing exists at the given path
    NotFound,
    /// The operation is not supported for the path
    OperationNotSupported,
    /// Path element does not belong under its parent
    PathHierarchy,
    /// A path key has an invalid value
    PathKeyContent,
    /// A path key has the wrong shape
    PathKeyStructure,
    /// A path string could not be parsed
    PathStringFormat,
    /// The user lacks permission for the operation
    Permissions,
    /// A value has the wrong shape
    ValueStructure,
    /// A value has invalid content
    ValueContent,
    /// Commit rejected; `data` lists the failing changes
    ConfigCommit,
    /// Anything the client does not recognise
    Unexpected,
}

impl RpcError {
    /// Create an error object with no data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Classify the error from its code and `data.type`
    pub fn kind(&self) -> RemoteErrorKind {
        if self.code != M2M_ERROR_CODE {
            return RemoteErrorKind::Unexpected;
        }

        match &self.data {
            Some(Value::Array(details)) => {
                let all_commit = details
                    .iter()
                    .all(|d| d.get("type").and_then(Value::as_str) == Some("config_commit_error"));
                if all_commit {
                    RemoteErrorKind::ConfigCommit
                } else {
                    RemoteErrorKind::Unexpected
                }
            }
            Some(data) => match data.get("type").and_then(Value::as_str) {
                Some("cisco_error") => RemoteErrorKind::Cisco,
                Some("datatype_not_supported_error") => RemoteErrorKind::DatatypeNotSupported,
                Some("file_exists_error") => RemoteErrorKind::FileExists,
                Some("invalid_argument_error") => RemoteErrorKind::InvalidArgument,
                Some("not_found_error") => RemoteErrorKind::NotFound,
                Some("operation_not_supported_error") => RemoteErrorKind::OperationNotSupported,
                Some("path_hierarchy_error") => RemoteErrorKind::PathHierarchy,
                Some("path_key_content_error") => RemoteErrorKind::PathKeyContent,
                Some("path_key_structure_error") => RemoteErrorKind::PathKeyStructure,
                Some("path_string_format_error") => RemoteErrorKind::PathStringFormat,
                Some("permissions_error") => RemoteErrorKind::Permissions,
                Some("value_structure_error") => RemoteErrorKind::ValueStructure,
                Some("value_content_error") => RemoteErrorKind::ValueContent,
                _ => RemoteErrorKind::Unexpected,
            },
            None => RemoteErrorKind::Unexpected,
        }
    }

    /// Path the error refers to, when the server supplied one
    pub fn path(&self) -> Option<&str> {
        self.data.as_ref()?.get("path")?.as_str()
    }
}
