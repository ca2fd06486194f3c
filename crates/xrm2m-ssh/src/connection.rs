//! SSH connection management
//!
//! libssh2 is blocking and keeps one lock per session, so a read parked on
//! the channel would stall writes. The channel is therefore switched to
//! non-blocking mode and driven by a single pump thread that shuttles bytes
//! between it and the async side.

use crate::transport::Link;
use crate::{AuthMethod, SshConfig, TransportError};
use async_trait::async_trait;
use ssh2::{Channel, MethodType, Session};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Frames buffered from the remote side before the pump blocks
const INCOMING_DEPTH: usize = 64;

/// Size of one channel read
const READ_CHUNK: usize = 8192;

/// Running remote command exposed as an async duplex stream
pub struct SshChannel {
    /// Bytes for the remote stdin; dropped on shutdown
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Chunks of remote stdout
    incoming: mpsc::Receiver<io::Result<Vec<u8>>>,
    /// Unread remainder of the last incoming chunk
    pending: Vec<u8>,
    /// Pump thread handle
    pump: Option<JoinHandle<Result<(), TransportError>>>,
}

impl SshChannel {
    /// Dial, authenticate, run `config.command` and start the pump
    pub async fn open(config: SshConfig, methods: Vec<AuthMethod>) -> Result<Self, TransportError> {
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
        let (session, channel) = tokio::task::spawn_blocking(move || establish(&config, &methods))
            .await
            .map_err(|e| TransportError::Session(format!("connect worker failed: {}", e)))??;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(INCOMING_DEPTH);

        let pump = thread::Builder::new()
            .name("xrm2m-ssh-pump".to_string())
            .spawn(move || pump(session, channel, out_rx, in_tx, poll_interval))
            .map_err(|e| TransportError::Channel(format!("can't start pump thread: {}", e)))?;

        Ok(Self {
            outgoing: Some(out_tx),
            incoming: in_rx,
            pending: Vec::new(),
            pump: Some(pump),
        })
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "SSH channel closed")
}

impl AsyncRead for SshChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() {
            match self.incoming.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(Some(Ok(chunk))) => self.pending = chunk,
            }
        }

        let n = buf.remaining().min(self.pending.len());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SshChannel {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let result = match &self.outgoing {
            Some(tx) => tx.send(buf.to_vec()).map(|_| buf.len()).map_err(|_| broken_pipe()),
            None => Err(broken_pipe()),
        };
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.outgoing.take();
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Link for SshChannel {
    async fn close(mut self) -> Result<(), TransportError> {
        debug!("Closing SSH connection");
        self.outgoing.take();
        self.incoming.close();

        match self.pump.take() {
            Some(pump) => tokio::task::spawn_blocking(move || pump.join())
                .await
                .map_err(|e| TransportError::Session(format!("close worker failed: {}", e)))?
                .map_err(|_| TransportError::Session("pump thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        // Dropping the sender tells the pump to close the channel
        self.outgoing.take();
    }
}

/// Blocking connect: dial, handshake, authenticate, open channel, exec
fn establish(config: &SshConfig, methods: &[AuthMethod]) -> Result<(Session, Channel), TransportError> {
    let address = config.address();
    let timeout = Duration::from_secs(config.connect_timeout.max(1));

    let addrs: Vec<_> = address
        .to_socket_addrs()
        .map_err(|e| TransportError::Dial(format!("{}: {}", address, e)))?
        .collect();

    let mut last_err = None;
    let mut tcp = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                debug!("Dial {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    let tcp = tcp.ok_or_else(|| {
        TransportError::Dial(match last_err {
            Some(e) => format!("{}: {}", address, e),
            None => format!("{}: no addresses", address),
        })
    })?;

    let mut session = Session::new().map_err(TransportError::session)?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().try_into().unwrap_or(u32::MAX));

    if !config.ciphers.is_empty() {
        let prefs = config.ciphers.join(",");
        session
            .method_pref(MethodType::CryptCs, &prefs)
            .and_then(|_| session.method_pref(MethodType::CryptSc, &prefs))
            .map_err(|e| TransportError::Configuration(format!("cipher list {:?}: {}", prefs, e)))?;
    }

    session.handshake().map_err(TransportError::session)?;

    // No known_hosts check: routers are addressed directly, like the CLI
    if let Some((key, key_type)) = session.host_key() {
        let fingerprint = session
            .host_key_hash(ssh2::HashType::Sha256)
            .map(|h| h.iter().map(|b| format!("{:02x}", b)).collect::<String>())
            .unwrap_or_default();
        debug!(
            "Host key {:?} ({} bytes) sha256 {}",
            key_type,
            key.len(),
            fingerprint
        );
    }

    authenticate(&session, &config.credentials.user, methods)?;

    let mut channel = session
        .channel_session()
        .map_err(|e| TransportError::Channel(e.to_string()))?;
    channel
        .exec(&config.command)
        .map_err(|e| TransportError::Exec(format!("{:?}: {}", config.command, e)))?;

    session.set_timeout(0);
    session.set_blocking(false);

    Ok((session, channel))
}

/// Try each method in order until the session is authenticated
fn authenticate(session: &Session, user: &str, methods: &[AuthMethod]) -> Result<(), TransportError> {
    let mut failures = Vec::with_capacity(methods.len());

    for method in methods {
        let result = match method {
            AuthMethod::Password(password) => session.userauth_password(user, password),
            AuthMethod::PublicKey { pem, .. } => session.userauth_pubkey_memory(user, None, pem, None),
        };

        match result {
            Ok(()) if session.authenticated() => {
                debug!("Authenticated {} with {}", user, method.name());
                return Ok(());
            }
            Ok(()) => failures.push(format!("{}: rejected", method.name())),
            Err(e) => failures.push(format!("{}: {}", method.name(), e)),
        }
    }

    Err(TransportError::Authentication(format!(
        "{} ({})",
        user,
        failures.join(", ")
    )))
}

/// Shuttle bytes between the non-blocking channel and the async side
fn pump(
    session: Session,
    mut channel: Channel,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    incoming: mpsc::Sender<io::Result<Vec<u8>>>,
    poll_interval: Duration,
) -> Result<(), TransportError> {
    let mut buf = vec![0u8; READ_CHUNK];

    let result = loop {
        let mut idle = true;

        match outgoing.try_recv() {
            Ok(data) => {
                idle = false;
                if let Err(e) = write_fully(&mut channel, &data, poll_interval) {
                    error!("SSH channel write failed: {}", e);
                    let _ = incoming.blocking_send(Err(e));
                    break Err(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
                }
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => break Ok(()),
        }

        match channel.read(&mut buf) {
            Ok(0) if channel.eof() => {
                debug!("Remote command closed its output");
                break Ok(());
            }
            Ok(0) => {}
            Ok(n) => {
                idle = false;
                if incoming.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                error!("SSH channel read failed: {}", e);
                let _ = incoming.blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
                break Err(TransportError::Io(e));
            }
        }

        match channel.stderr().read(&mut buf) {
            Ok(n) if n > 0 => {
                idle = false;
                debug!("Remote stderr: {}", String::from_utf8_lossy(&buf[..n]).trim_end());
            }
            _ => {}
        }

        if idle {
            thread::sleep(poll_interval);
        }
    };

    drop(incoming);
    let closed = shutdown(&session, &mut channel);
    match (result, closed) {
        (Err(e), _) => Err(e),
        (Ok(()), closed) => closed,
    }
}

fn write_fully(channel: &mut Channel, mut data: &[u8], poll_interval: Duration) -> io::Result<()> {
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll_interval),
            Err(e) => return Err(e),
        }
    }
    loop {
        match channel.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll_interval),
            Err(e) => return Err(e),
        }
    }
}

fn shutdown(session: &Session, channel: &mut Channel) -> Result<(), TransportError> {
    session.set_blocking(true);
    session.set_timeout(5_000);

    if let Err(e) = channel.send_eof() {
        warn!("Failed to send EOF on SSH channel: {}", e);
    }
    let closed = channel.close().map_err(TransportError::session);
    if let Err(e) = session.disconnect(None, "closing", None) {
        warn!("SSH disconnect failed: {}", e);
    }
    debug!("SSH session closed");
    closed
}
