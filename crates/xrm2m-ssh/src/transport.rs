//! Session transport: a duplex byte stream behind a startup readiness gate
//!
//! `json_rpc_server` prints a preamble (blank lines and a timestamp) before it
//! starts speaking JSON-RPC. The transport hands back a handle as soon as the
//! command is running and discards the preamble on a background task; every
//! read and write waits for that task to finish first.

use crate::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Remote command that starts the M2M listener
pub const DEFAULT_COMMAND: &str = "run json_rpc_server";

/// Bytes read by the default single-read preamble discard
pub const DEFAULT_PREAMBLE_SIZE: usize = 128;

/// Byte stream consumed by the RPC layer
#[async_trait]
pub trait ByteStream: Send {
    /// Read some bytes; `Ok(0)` means the peer closed the stream
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some bytes, returning how many were accepted
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Write the whole buffer and flush it
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Close the stream
    async fn close(self) -> Result<(), TransportError>;
}

/// Underlying duplex connection a transport runs over
#[async_trait]
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Tear the connection down
    async fn close(self) -> Result<(), TransportError>;
}

#[async_trait]
impl Link for DuplexStream {
    async fn close(mut self) -> Result<(), TransportError> {
        self.shutdown().await?;
        Ok(())
    }
}

/// How the startup preamble is discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preamble {
    /// One read of up to `max` bytes
    SingleRead {
        /// Read buffer size
        max: usize,
    },
    /// Read until the first non-blank line has been consumed
    DateLine,
    /// Nothing to discard
    None,
}

impl Default for Preamble {
    fn default() -> Self {
        Self::SingleRead {
            max: DEFAULT_PREAMBLE_SIZE,
        }
    }
}

/// Readiness of a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Preamble not consumed yet
    Pending,
    /// Protocol traffic may flow
    Ready,
    /// Preamble discard failed; the transport is unusable
    Faulted(String),
}

/// SSH configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Login credentials
    pub credentials: crate::Credentials,
    /// Remote command to run
    pub command: String,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Cipher preference list offered to the server
    pub ciphers: Vec<String>,
    /// Preamble handling
    pub preamble: Preamble,
    /// Idle poll interval of the SSH pump, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            credentials: crate::Credentials::new("root"),
            command: DEFAULT_COMMAND.to_string(),
            connect_timeout: 30,
            // Older XR images only offer CBC ciphers
            ciphers: vec![
                "aes128-ctr".to_string(),
                "aes128-cbc".to_string(),
                "aes256-ctr".to_string(),
            ],
            preamble: Preamble::default(),
            poll_interval_ms: 10,
        }
    }
}

impl SshConfig {
    /// Configuration for a `[user@]host[:port]` target
    pub fn for_target(target: &str) -> Self {
        let (user, host, port) = parse_target(target);
        Self {
            host,
            port,
            credentials: crate::Credentials::new(user),
            ..Default::default()
        }
    }

    /// `host:port` string used for dialing
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parse a target string into `(user, host, port)`
///
/// Format: `[user@]host[:port]`, defaulting to `root` and port 22.
pub fn parse_target(target: &str) -> (String, String, u16) {
    let mut username = "root".to_string();
    let mut host = target.to_string();
    let mut port = 22;

    if let Some(at_pos) = target.rfind('@') {
        username = target[..at_pos].to_string();
        host = target[at_pos + 1..].to_string();
    }

    if let Some(colon_pos) = host.rfind(':') {
        if let Ok(parsed_port) = host[colon_pos + 1..].parse::<u16>() {
            port = parsed_port;
            host = host[..colon_pos].to_string();
        }
    }

    if host.starts_with('[') && host.ends_with(']') {
        host = host[1..host.len() - 1].to_string();
    }

    (username, host, port)
}

/// Link plus whatever the preamble discard read past the preamble
struct Guarded<S> {
    stream: S,
    carry: Vec<u8>,
}

/// One remote command's stdin/stdout as a ready-gated byte stream
pub struct SessionTransport<S: Link> {
    link: Arc<Mutex<Guarded<S>>>,
    ready: watch::Receiver<Readiness>,
    preamble_task: JoinHandle<()>,
}

#[cfg(feature = "ssh2")]
impl SessionTransport<crate::SshChannel> {
    /// Dial, authenticate and start `config.command`
    ///
    /// Returns once the command is running; the preamble is discarded in the
    /// background.
    pub async fn connect(config: &SshConfig) -> Result<Self, TransportError> {
        let methods = crate::auth_methods(&config.credentials)?;

        tracing::info!(
            "Connecting to {}@{}",
            config.credentials.user,
            config.address()
        );
        let channel = crate::SshChannel::open(config.clone(), methods).await?;
        tracing::info!("Started {:?} on {}", config.command, config.address());

        Ok(Self::new(channel, config.preamble))
    }
}

impl<S: Link> SessionTransport<S> {
    /// Wrap a running link and start discarding its preamble
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(stream: S, preamble: Preamble) -> Self {
        let link = Arc::new(Mutex::new(Guarded {
            stream,
            carry: Vec::new(),
        }));
        let (tx, ready) = watch::channel(Readiness::Pending);

        let task_link = Arc::clone(&link);
        let preamble_task = tokio::spawn(async move {
            let mut guarded = task_link.lock().await;
            let state = match discard_preamble(&mut guarded, preamble).await {
                Ok(n) => {
                    debug!("Discarded {} preamble bytes", n);
                    Readiness::Ready
                }
                Err(e) => {
                    error!("Can't read preamble: {}", e);
                    Readiness::Faulted(e.to_string())
                }
            };
            tx.send_replace(state);
        });

        Self {
            link,
            ready,
            preamble_task,
        }
    }

    /// Current readiness, without waiting
    pub fn readiness(&self) -> Readiness {
        self.ready.borrow().clone()
    }

    /// Whether the preamble has been consumed
    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Wait until the preamble is gone, or fail if it could not be read
    pub async fn wait_ready(&self) -> io::Result<()> {
        let mut ready = self.ready.clone();
        let state = ready
            .wait_for(|r| *r != Readiness::Pending)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    TransportError::Preamble("preamble task ended without reporting".to_string()),
                )
            })?
            .clone();

        match state {
            Readiness::Faulted(reason) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                TransportError::Preamble(reason),
            )),
            _ => Ok(()),
        }
    }

    /// Read once from the remote command's stdout
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.wait_ready().await?;
        let mut guarded = self.link.lock().await;

        if !guarded.carry.is_empty() {
            let n = buf.len().min(guarded.carry.len());
            buf[..n].copy_from_slice(&guarded.carry[..n]);
            guarded.carry.drain(..n);
            return Ok(n);
        }

        guarded.stream.read(buf).await
    }

    /// Write once to the remote command's stdin
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.wait_ready().await?;
        self.link.lock().await.stream.write(buf).await
    }

    /// Write the whole buffer and flush it
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.wait_ready().await?;
        let mut guarded = self.link.lock().await;
        guarded.stream.write_all(buf).await?;
        guarded.stream.flush().await
    }

    /// Close the underlying session
    pub async fn close(self) -> Result<(), TransportError> {
        self.preamble_task.abort();
        // Once the task has been awaited its clone of `link` is dropped, so
        // `self` holds the only reference
        let _ = self.preamble_task.await;

        let guarded = Arc::into_inner(self.link)
            .ok_or_else(|| TransportError::Preamble("preamble task still holds the link".to_string()))?
            .into_inner();

        debug!("Closing session transport");
        guarded.stream.close().await
    }
}

#[async_trait]
impl<S: Link> ByteStream for SessionTransport<S> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SessionTransport::read(self, buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SessionTransport::write(self, buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        SessionTransport::write_all(self, buf).await
    }

    async fn close(self) -> Result<(), TransportError> {
        SessionTransport::close(self).await
    }
}

/// Consume the preamble, returning how many bytes were discarded
async fn discard_preamble<S: Link>(guarded: &mut Guarded<S>, preamble: Preamble) -> io::Result<usize> {
    match preamble {
        Preamble::None => Ok(0),
        Preamble::SingleRead { max } => {
            let mut buf = vec![0u8; max.max(1)];
            let n = guarded.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(closed_before_preamble());
            }
            debug!("Preamble: {:?}", String::from_utf8_lossy(&buf[..n]));
            Ok(n)
        }
        Preamble::DateLine => {
            let mut acc = Vec::new();
            let mut consumed = 0;
            let mut scanned = 0;
            let mut chunk = [0u8; 256];
            loop {
                while let Some(pos) = acc[scanned..].iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = acc.drain(..=scanned + pos).collect();
                    scanned = 0;
                    consumed += line.len();
                    if !line.iter().all(u8::is_ascii_whitespace) {
                        debug!("Read date line {:?}", String::from_utf8_lossy(&line));
                        guarded.carry = acc;
                        return Ok(consumed);
                    }
                }
                scanned = acc.len();

                let n = guarded.stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(closed_before_preamble());
                }
                acc.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

fn closed_before_preamble() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "remote command closed before sending its preamble",
    )
}
