//! JSON-RPC round trips over a byte stream

use crate::{M2mError, Result};
use serde_json::Value;
use tracing::debug;
use xrm2m_proto::{LineCodec, Params, ProtocolError, Request, Response};
use xrm2m_ssh::ByteStream;

/// Size of one read from the stream
const READ_CHUNK: usize = 8192;

/// One outstanding call at a time over a byte stream
pub struct RpcChannel<T: ByteStream> {
    stream: T,
    codec: LineCodec,
    next_id: u64,
}

impl<T: ByteStream> RpcChannel<T> {
    /// Wrap a stream; request IDs start at 1
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            codec: LineCodec::new(),
            next_id: 1,
        }
    }

    /// Send one request and wait for its result
    pub async fn call(&mut self, method: &str, params: Params) -> Result<Value> {
        let id = self.next_id;
        let request = Request::new(id, method, params.into_map()?);
        let line = self.codec.encode(&request)?;

        debug!("Request {}: {}", id, String::from_utf8_lossy(&line).trim_end());
        self.stream.write_all(&line).await?;
        self.next_id += 1;

        let response = self.read_response().await?;
        if response.id != id {
            return Err(ProtocolError::UnexpectedResponseId {
                expected: id,
                got: response.id,
            }
            .into());
        }

        debug!("Request {} {}", id, if response.error.is_some() { "failed" } else { "succeeded" });
        response.into_result().map_err(M2mError::Remote)
    }

    async fn read_response(&mut self) -> Result<Response> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(response) = self.codec.try_decode()? {
                return Ok(response);
            }

            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(M2mError::Disconnected);
            }
            self.codec.push(&buf[..n]);
        }
    }

    /// Close the underlying stream
    pub async fn close(self) -> Result<()> {
        self.stream.close().await?;
        Ok(())
    }
}
