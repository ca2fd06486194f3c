//! Stub M2M server for integration tests
//!
//! Speaks the same newline-delimited JSON-RPC as `json_rpc_server` over an
//! in-memory duplex pipe, prints a preamble first, and records every request
//! it receives.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use xrm2m::proto::{LineCodec, Request, Response, RpcError};
use xrm2m::{M2mClient, Preamble, SessionTransport};

/// Preamble printed by the server before any JSON-RPC traffic
pub const PREAMBLE: &[u8] = b"\r\n\r\nThu Oct 15 10:00:00.000 UTC\r\n";

/// Client type used against the stub
pub type StubClient = M2mClient<SessionTransport<DuplexStream>>;

/// Handle to a running stub server
pub struct StubServer {
    requests: Arc<Mutex<Vec<Request>>>,
    release: Option<oneshot::Sender<()>>,
}

impl StubServer {
    /// Start a server that prints its preamble immediately
    pub fn start<F>(handler: F) -> (StubClient, Self)
    where
        F: FnMut(&Request) -> Result<Value, RpcError> + Send + 'static,
    {
        let (client, mut server) = Self::start_held(handler);
        server.release_preamble();
        (client, server)
    }

    /// Start a server that withholds its preamble until released
    pub fn start_held<F>(mut handler: F) -> (StubClient, Self)
    where
        F: FnMut(&Request) -> Result<Value, RpcError> + Send + 'static,
    {
        let (local, mut remote) = duplex(64 * 1024);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        let (release, released) = oneshot::channel();

        tokio::spawn(async move {
            if released.await.is_err() {
                return;
            }
            if remote.write_all(PREAMBLE).await.is_err() {
                return;
            }

            let mut codec = LineCodec::new();
            while let Ok(Some(req)) = codec.read_message::<Request, _>(&mut remote).await {
                let resp = match handler(&req) {
                    Ok(result) => Response::success(req.id, result),
                    Err(error) => Response::error(req.id, error),
                };
                log.lock().unwrap().push(req);
                if codec.write_message(&mut remote, &resp).await.is_err() {
                    break;
                }
            }
        });

        let client = M2mClient::new(SessionTransport::new(local, Preamble::DateLine));
        (
            client,
            Self {
                requests,
                release: Some(release),
            },
        )
    }

    /// Let the server print its preamble
    pub fn release_preamble(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }

    /// Number of requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Method names received, in order
    pub fn methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    /// Parameters of the `index`th request
    pub fn params(&self, index: usize) -> Value {
        Value::Object(self.requests.lock().unwrap()[index].params.clone())
    }
}

/// Shortest wait that makes an ordering assertion meaningful
pub fn settle() -> Duration {
    Duration::from_millis(50)
}
