//! Typed M2M client with latch-once error handling
//!
//! Every method performs one round trip and returns its result directly. The
//! first failure is latched: from then on every call is a no-op returning the
//! zero value of its type, so a transaction can be written as a flat sequence
//! of calls with one check at the end:
//!
//! ```no_run
//! # async fn example() -> xrm2m::Result<()> {
//! use xrm2m::{Credentials, SshClient};
//!
//! let creds = Credentials::new("cisco").with_password("cisco");
//! let mut client = SshClient::connect("router:22", creds).await?;
//!
//! client.set("RootCfg.Hostname", "xr-lab-1").await;
//! let commit_id = client.commit(Some("rename"), None).await;
//!
//! match client.error() {
//!     Some(e) => eprintln!("{} failed: {}", client.last_op(), e),
//!     None => println!("committed {:?}", commit_id),
//! }
//! # Ok(())
//! # }
//! ```

use crate::rpc::RpcChannel;
use crate::{M2mError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use xrm2m_proto::Params;
use xrm2m_ssh::ByteStream;

#[cfg(feature = "ssh2")]
use xrm2m_ssh::{Credentials, SessionTransport, SshChannel, SshConfig};

/// Rows returned by `get` and `cli_get`
pub type Rows = Vec<Vec<Value>>;

/// Field name to value mapping
pub type Object = Map<String, Value>;

/// Client for the M2M API
pub struct M2mClient<T: ByteStream> {
    rpc: RpcChannel<T>,
    error: Option<M2mError>,
    last_op: String,
}

/// Client connected over SSH
#[cfg(feature = "ssh2")]
pub type SshClient = M2mClient<SessionTransport<SshChannel>>;

#[cfg(feature = "ssh2")]
impl M2mClient<SessionTransport<SshChannel>> {
    /// Connect to `host` (`host` or `host:port`) and start the M2M listener
    pub async fn connect(host: &str, credentials: Credentials) -> Result<Self> {
        let mut config = SshConfig::for_target(host);
        config.credentials = credentials;
        Self::connect_with(&config).await
    }

    /// Connect using a full SSH configuration
    pub async fn connect_with(config: &SshConfig) -> Result<Self> {
        let transport = SessionTransport::connect(config).await?;
        Ok(Self::new(transport))
    }
}

impl<T: ByteStream> M2mClient<T> {
    /// Build a client over an established stream
    pub fn new(stream: T) -> Self {
        Self {
            rpc: RpcChannel::new(stream),
            error: None,
            last_op: String::new(),
        }
    }

    /// The latched error, if any call has failed
    pub fn error(&self) -> Option<&M2mError> {
        self.error.as_ref()
    }

    /// Method that produced the latched error, or the last method run
    pub fn last_op(&self) -> &str {
        &self.last_op
    }

    /// Whether an error has been latched
    pub fn is_faulted(&self) -> bool {
        self.error.is_some()
    }

    /// Close the client and report the latched error, if any
    pub async fn into_result(self) -> Result<()> {
        let Self {
            rpc,
            error,
            last_op,
        } = self;

        let closed = rpc.close().await;
        match error {
            Some(source) => Err(M2mError::Operation {
                op: last_op,
                source: Box::new(source),
            }),
            None => closed,
        }
    }

    /// Close the underlying transport
    pub async fn close(self) -> Result<()> {
        self.rpc.close().await
    }

    /// One round trip, skipped if an error is already latched
    async fn dispatch<R, F>(&mut self, method: &'static str, params: Params, decode: F) -> R
    where
        R: Default,
        F: FnOnce(Value) -> Result<R>,
    {
        if self.error.is_some() {
            return R::default();
        }

        let outcome = match self.rpc.call(method, params).await {
            Ok(value) => decode(value),
            Err(e) => Err(e),
        };
        self.last_op = method.to_string();

        match outcome {
            Ok(value) => value,
            Err(e) => {
                warn!("{} failed: {}", method, e);
                self.error = Some(e);
                R::default()
            }
        }
    }

    async fn call_for<R>(&mut self, method: &'static str, params: Params) -> R
    where
        R: DeserializeOwned + Default,
    {
        self.dispatch(method, params, |value| match value {
            // A null result stands for an empty one
            Value::Null => Ok(R::default()),
            value => decode(method, value),
        })
        .await
    }

    async fn call_for_void(&mut self, method: &'static str, params: Params) {
        self.dispatch(method, params, |_| Ok(())).await
    }

    async fn call_for_optional_string(&mut self, method: &'static str, params: Params) -> Option<String> {
        self.dispatch(method, params, |value| {
            let id: Option<String> = decode(method, value)?;
            Ok(id.filter(|id| !id.is_empty()))
        })
        .await
    }

    // CLI transition tools

    /// Run a free-form CLI exec command and return its output
    pub async fn cli_exec(&mut self, command: &str) -> String {
        self.call_for("cli_exec", Params::new().arg("command", command)).await
    }

    /// Run a CLI show command, returning `(path, value)` rows
    pub async fn cli_get(&mut self, command: &str) -> Rows {
        self.call_for("cli_get", Params::new().arg("command", command)).await
    }

    /// Run a CLI show command, returning the nested result
    pub async fn cli_get_nested(&mut self, command: &str) -> Value {
        let params = Params::new().arg("command", command).arg("format", "nested");
        self.call_for("cli_get", params).await
    }

    /// Apply a CLI configuration command to the pending change buffer
    pub async fn cli_set(&mut self, command: &str) {
        self.call_for_void("cli_set", Params::new().arg("command", command)).await
    }

    /// Translate a CLI command into the schema operations it performs
    pub async fn cli_describe(&mut self, command: &str, config: bool) -> Vec<Object> {
        let params = Params::new()
            .arg("command", command)
            .arg("configuration", config);
        self.call_for("cli_describe", params).await
    }

    /// Write `data` to `filename` on the router
    ///
    /// The payload travels as a JSON string; bytes that are not valid UTF-8
    /// are replaced.
    pub async fn write_file(&mut self, filename: &str, data: &[u8]) {
        let params = Params::new()
            .arg("filename", filename)
            .arg("data", String::from_utf8_lossy(data));
        self.call_for_void("write_file", params).await
    }

    // Basic schema ops

    /// Get the `(path, value)` rows under `path`
    pub async fn get(&mut self, path: &str) -> Rows {
        self.call_for("get", Params::new().arg("path", path)).await
    }

    /// Get the data under `path` as one nested value
    pub async fn get_nested(&mut self, path: &str) -> Value {
        let params = Params::new().arg("path", path).arg("format", "nested");
        self.call_for("get", params).await
    }

    /// Get the single value at `path`
    ///
    /// Matching no paths latches `NotFound`; more than one latches `Ambiguous`.
    pub async fn get_value(&mut self, path: &str) -> Value {
        self.dispatch("get", Params::new().arg("path", path), |value| {
            let mut rows: Vec<(String, Value)> = match value {
                Value::Null => Vec::new(),
                value => decode("get", value)?,
            };
            match rows.len() {
                0 => Err(M2mError::NotFound {
                    path: path.to_string(),
                }),
                1 => Ok(rows.remove(0).1),
                _ => Err(M2mError::Ambiguous {
                    path: path.to_string(),
                }),
            }
        })
        .await
    }

    /// Names of the child elements of `path`
    pub async fn get_children(&mut self, path: &str) -> Vec<String> {
        self.call_for("get_children", Params::new().arg("path", path)).await
    }

    /// Parent path of `path`
    pub async fn get_parent(&mut self, path: &str) -> String {
        self.call_for("get_parent", Params::new().arg("path", path)).await
    }

    /// Canonical form of `path`
    pub async fn normalize_path(&mut self, path: &str) -> String {
        self.call_for("normalize_path", Params::new().arg("path", path)).await
    }

    /// Set the value at `path` in the pending change buffer
    pub async fn set<V: Serialize>(&mut self, path: &str, value: V) {
        let params = Params::new().arg("path", path).arg("value", value);
        self.call_for_void("set", params).await
    }

    /// Delete the subtree at `path`
    pub async fn delete(&mut self, path: &str) {
        self.call_for_void("delete", Params::new().arg("path", path)).await
    }

    /// Mark the subtree at `path` for full replacement
    pub async fn replace(&mut self, path: &str) {
        self.call_for_void("replace", Params::new().arg("path", path)).await
    }

    // Commit operations.

    /// Commit the pending changes
    ///
    /// Returns the new commit ID, or `None` when there was nothing to commit.
    /// `None` with no latched error is a success.
    pub async fn commit(&mut self, comment: Option<&str>, label: Option<&str>) -> Option<String> {
        let id = self
            .call_for_optional_string("commit", commit_params(comment, label))
            .await;
        if !self.is_faulted() {
            info!("Commit succeeded. Commit ID: {:?}", id);
        }
        id
    }

    /// Commit the pending changes, replacing the whole running configuration
    pub async fn commit_replace(&mut self, comment: Option<&str>, label: Option<&str>) -> Option<String> {
        let id = self
            .call_for_optional_string("commit_replace", commit_params(comment, label))
            .await;
        if !self.is_faulted() {
            info!("Commit replace succeeded. Commit ID: {:?}", id);
        }
        id
    }

    /// Drop all pending changes
    pub async fn discard_changes(&mut self) {
        self.call_for_void("discard_changes", Params::new()).await
    }

    /// List the pending changes
    pub async fn get_changes(&mut self) -> Vec<Object> {
        self.call_for("get_changes", Params::new()).await
    }

    // Schema inspection

    /// Schema metadata for `path`; a non-empty `fields` restricts the result
    pub async fn get_schema(&mut self, path: &str, fields: &str) -> Object {
        let params = Params::new()
            .arg("path", path)
            .opt_arg("fields", Some(fields).filter(|f| !f.is_empty()));
        self.call_for("get_schema", params).await
    }

    /// Server and protocol version information
    pub async fn get_version(&mut self) -> Object {
        self.call_for("get_version", Params::new()).await
    }
}

fn commit_params(comment: Option<&str>, label: Option<&str>) -> Params {
    Params::new()
        .opt_arg("comment", comment.filter(|c| !c.is_empty()))
        .opt_arg("label", label.filter(|l| !l.is_empty()))
}

fn decode<R: DeserializeOwned>(method: &str, value: Value) -> Result<R> {
    serde_json::from_value(value).map_err(|source| M2mError::Decode {
        method: method.to_string(),
        source,
    })
}
