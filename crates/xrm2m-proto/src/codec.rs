//! Line codec for async streams
//!
//! The server writes one JSON object per line. Somewhere between the server's
//! stdout and the SSH client `\n` can turn into `\r\n`, so a trailing `\r`
//! is dropped before parsing.

use crate::ProtocolError;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Maximum line length (16MB)
pub const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Newline-delimited JSON codec
pub struct LineCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Prefix of `read_buf` already searched for a newline
    scanned: usize,
    /// Maximum line length allowed
    max_line: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_SIZE)
    }

    /// Create a new codec with a custom maximum line length
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            scanned: 0,
            max_line,
        }
    }

    /// Encode a message as one line
    pub fn encode<T: Serialize>(&self, msg: &T) -> Result<Bytes, ProtocolError> {
        let mut line = serde_json::to_vec(msg)?;

        if line.len() > self.max_line {
            return Err(ProtocolError::LineTooLong {
                size: line.len(),
                max: self.max_line,
            });
        }

        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    /// Add received bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Try to decode one message from the internal buffer
    pub fn try_decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        loop {
            let found = self.read_buf[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(newline) = found.map(|offset| self.scanned + offset) else {
                self.scanned = self.read_buf.len();
                if self.read_buf.len() > self.max_line {
                    return Err(ProtocolError::LineTooLong {
                        size: self.read_buf.len(),
                        max: self.max_line,
                    });
                }
                return Ok(None);
            };

            let raw = self.read_buf.split_to(newline + 1);
            self.scanned = 0;
            let mut line = &raw[..newline];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            debug!("Received line: {}", String::from_utf8_lossy(line));

            return serde_json::from_slice(line)
                .map(Some)
                .map_err(|e| ProtocolError::MalformedJson {
                    line: String::from_utf8_lossy(line).into_owned(),
                    reason: e.to_string(),
                });
        }
    }

    /// Write a message to an async writer
    pub async fn write_message<T, W>(&self, writer: &mut W, msg: &T) -> Result<(), ProtocolError>
    where
        T: Serialize,
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode(msg)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a message from an async reader; `None` on clean EOF
    pub async fn read_message<T, R>(&mut self, reader: &mut R) -> Result<Option<T>, ProtocolError>
    where
        T: DeserializeOwned,
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(msg) = self.try_decode()? {
                return Ok(Some(msg));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return Err(ProtocolError::MalformedJson {
                    line: String::from_utf8_lossy(&self.read_buf).into_owned(),
                    reason: "unterminated line at end of stream".to_string(),
                });
            }

            self.push(&temp_buf[..n]);
        }
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};
    use proptest::prelude::*;
    use serde_json::{json, Map, Value};
    use std::io::Cursor;

    #[test]
    fn test_encode_is_one_line() {
        let codec = LineCodec::new();
        let encoded = codec.encode(&Request::new(1, "get_version", Map::new())).unwrap();

        assert_eq!(encoded.last(), Some(&b'\n'));
        assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_partial_line() {
        let mut codec = LineCodec::new();
        let line = br#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#;

        codec.push(&line[..10]);
        assert!(codec.try_decode::<Response>().unwrap().is_none());

        codec.push(&line[10..]);
        assert!(codec.try_decode::<Response>().unwrap().is_none());

        codec.push(b"\n");
        let resp: Response = codec.try_decode().unwrap().unwrap();
        assert_eq!(resp.id, 1);
        assert_eq!(resp.result, json!("ok"));
        assert_eq!(codec.buffer_size(), 0);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut codec = LineCodec::new();
        codec.push(b"\r\n\n{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":[]}\r\n");

        let resp: Response = codec.try_decode().unwrap().unwrap();
        assert_eq!(resp.id, 2);
        assert_eq!(resp.result, json!([]));
    }

    #[test]
    fn test_malformed_line() {
        let mut codec = LineCodec::new();
        codec.push(b"not json\n");

        let result = codec.try_decode::<Response>();
        assert!(matches!(result, Err(ProtocolError::MalformedJson { line, .. }) if line == "not json"));
    }

    #[test]
    fn test_line_too_long() {
        let mut codec = LineCodec::with_max_line(16);
        codec.push(&[b'x'; 32]);

        let result = codec.try_decode::<Value>();
        assert!(matches!(result, Err(ProtocolError::LineTooLong { size: 32, max: 16 })));

        let big = Request::new(1, "cli_exec", Map::new());
        assert!(matches!(codec.encode(&big), Err(ProtocolError::LineTooLong { .. })));
    }

    #[tokio::test]
    async fn test_write_read_message() {
        let codec = LineCodec::new();
        let mut params = Map::new();
        params.insert("command".to_string(), json!("show version"));
        let req = Request::new(5, "cli_exec", params);

        let mut buffer = Vec::new();
        codec.write_message(&mut buffer, &req).await.unwrap();

        let mut codec2 = LineCodec::new();
        let mut cursor = Cursor::new(buffer);
        let decoded: Request = codec2.read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, req);

        let eof: Option<Request> = codec2.read_message(&mut cursor).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn test_unterminated_line_at_eof() {
        let mut codec = LineCodec::new();
        let mut cursor = Cursor::new(br#"{"id":1"#.to_vec());

        let result = codec.read_message::<Response, _>(&mut cursor).await;
        assert!(matches!(result, Err(ProtocolError::MalformedJson { .. })));
    }

    #[test]
    fn test_long_line_in_chunks() {
        let payload = "x".repeat(1024 * 1024);
        let line = format!("{{\"jsonrpc\":\"2.0\",\"id\":4,\"result\":\"{}\"}}\n", payload);

        let mut codec = LineCodec::new();
        let mut decoded = None;
        for chunk in line.as_bytes().chunks(8192) {
            assert!(decoded.is_none());
            codec.push(chunk);
            decoded = codec.try_decode::<Response>().unwrap();
        }

        let resp = decoded.unwrap();
        assert_eq!(resp.id, 4);
        assert_eq!(resp.result.as_str().map(str::len), Some(payload.len()));
        assert_eq!(codec.buffer_size(), 0);
    }

    #[test]
    fn test_next_line_after_partial_scan() {
        let mut codec = LineCodec::new();
        codec.push(b"{\"jsonrpc\":\"2.0\",\"id\":1,");
        assert!(codec.try_decode::<Response>().unwrap().is_none());

        // Completes the first line and carries a whole second one
        codec.push(b"\"result\":1}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":2}\n");
        assert_eq!(codec.try_decode::<Response>().unwrap().unwrap().id, 1);
        assert_eq!(codec.try_decode::<Response>().unwrap().unwrap().id, 2);
        assert!(codec.try_decode::<Response>().unwrap().is_none());
    }

    proptest! {
        #[test]
        fn test_any_split_point_decodes(split in 0usize..40) {
            let line = b"{\"jsonrpc\":\"2.0\",\"id\":9,\"result\":null}\r\n";
            let split = split.min(line.len());

            let mut codec = LineCodec::new();
            codec.push(&line[..split]);
            let early: Option<Response> = codec.try_decode()?;
            codec.push(&line[split..]);
            let decoded = match early {
                Some(resp) => resp,
                None => codec.try_decode::<Response>()?.unwrap(),
            };
            prop_assert_eq!(decoded.id, 9);
        }
    }
}
