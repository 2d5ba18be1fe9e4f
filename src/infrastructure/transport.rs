//! Transport
//!
//! TCP stream with an optional rustls session pumped through in-memory
//! buffers. The caller decides when bytes move: `send` writes and flushes,
//! `recv` returns buffered plaintext first and only then waits on the socket.
//!
//! `recv` is cancel-safe: the only await is a single socket read, and
//! everything after it runs synchronously.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::shared::error::TransportError;

/// Default socket receive buffer.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 64 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// How long `shutdown` waits for close_notify and FIN to leave.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolve `host:port` through the system resolver.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::NoAddress(host.to_string()));
    }
    Ok(addrs)
}

/// Connect to the first reachable address.
pub async fn connect(addrs: &[SocketAddr], recv_buffer_size: usize) -> Result<Transport, TransportError> {
    let mut last_err = None;

    for &addr in addrs {
        match connect_one(addr, recv_buffer_size).await {
            Ok(stream) => {
                tracing::debug!(%addr, "TCP connected");
                return Ok(Transport::plain(stream, addr));
            }
            Err(source) => {
                tracing::debug!(%addr, error = %source, "TCP connect failed");
                last_err = Some(TransportError::Connect { addr, source });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| TransportError::NoAddress("<empty address list>".into())))
}

async fn connect_one(addr: SocketAddr, recv_buffer_size: usize) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if recv_buffer_size > 0 {
        socket.set_recv_buffer_size(recv_buffer_size as u32)?;
    }
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// A connected byte stream, optionally wrapped in TLS.
pub struct Transport {
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<Connection>,
    scratch: Box<[u8]>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("secure", &self.is_secure())
            .finish()
    }
}

impl Transport {
    /// Wrap an already connected stream (accepted server sockets).
    pub fn plain(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            tls: None,
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Client-side TLS with SNI `host`. Each handshake read waits at most `wait`.
    pub async fn start_client_tls(
        &mut self,
        config: Arc<ClientConfig>,
        host: &str,
        wait: Duration,
    ) -> Result<(), TransportError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;
        let connection = ClientConnection::new(config, server_name)?;
        self.tls = Some(Connection::Client(connection));
        self.complete_handshake(wait).await
    }

    /// Server-side TLS. Each handshake read waits at most `wait`.
    pub async fn accept_tls(&mut self, config: Arc<ServerConfig>, wait: Duration) -> Result<(), TransportError> {
        let connection = ServerConnection::new(config)?;
        self.tls = Some(Connection::Server(connection));
        self.complete_handshake(wait).await
    }

    async fn complete_handshake(&mut self, wait: Duration) -> Result<(), TransportError> {
        let peer = self.peer;
        let Self {
            stream, tls, scratch, ..
        } = self;
        let Some(tls) = tls.as_mut() else {
            return Ok(());
        };

        while tls.is_handshaking() {
            if tls.wants_write() {
                flush_tls(stream, tls).await?;
            } else if tls.wants_read() {
                let n = timeout(wait, stream.read(scratch))
                    .await
                    .map_err(|_| TransportError::Timeout("TLS handshake"))??;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                feed_tls(tls, &scratch[..n])?;
                tls.process_new_packets()?;
            } else {
                return Err(TransportError::TlsConfig("TLS handshake stalled".into()));
            }
        }

        // Final handshake records (and any session tickets)
        flush_tls(stream, tls).await?;
        tracing::debug!(%peer, "TLS handshake complete");
        Ok(())
    }

    /// Write all of `data`.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self.tls.as_mut() {
            None => self.stream.write_all(data).await,
            Some(tls) => {
                let mut offset = 0;
                while offset < data.len() {
                    let written = tls.writer().write(&data[offset..])?;
                    offset += written;
                    flush_tls(&mut self.stream, tls).await?;
                    if written == 0 && !tls.wants_write() {
                        return Err(io::Error::new(io::ErrorKind::WriteZero, "TLS session refused plaintext"));
                    }
                }
                Ok(())
            }
        }
    }

    /// Append received plaintext to `buf`. Returns 0 once the peer has closed.
    pub async fn recv(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let Self {
            stream, tls, scratch, ..
        } = self;

        let Some(tls) = tls.as_mut() else {
            let n = stream.read(scratch).await?;
            buf.extend_from_slice(&scratch[..n]);
            return Ok(n);
        };

        loop {
            // Plaintext rustls already decrypted comes first
            if let Some(n) = drain_plaintext(tls, buf)? {
                return Ok(n);
            }

            let n = stream.read(scratch).await?;
            if n == 0 {
                return Ok(0);
            }
            feed_tls(tls, &scratch[..n])?;
            tls.process_new_packets()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        }
    }

    /// Send any TLS records queued by `recv` (alerts, key updates).
    pub async fn flush(&mut self) -> io::Result<()> {
        match self.tls.as_mut() {
            Some(tls) => flush_tls(&mut self.stream, tls).await,
            None => Ok(()),
        }
    }

    /// Best-effort orderly shutdown.
    pub async fn shutdown(&mut self) {
        if let Some(tls) = self.tls.as_mut() {
            tls.send_close_notify();
            let _ = timeout(SHUTDOWN_TIMEOUT, flush_tls(&mut self.stream, tls)).await;
        }
        let _ = timeout(SHUTDOWN_TIMEOUT, self.stream.shutdown()).await;
    }
}

fn feed_tls(tls: &mut Connection, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let n = tls.read_tls(&mut data)?;
        if n == 0 {
            break;
        }
    }
    Ok(())
}

/// `Some(n)` when plaintext was available (or the TLS stream ended, n == 0).
fn drain_plaintext(tls: &mut Connection, buf: &mut BytesMut) -> io::Result<Option<usize>> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut total = 0;
    loop {
        match tls.reader().read(&mut chunk) {
            Ok(0) => return Ok(Some(total)),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                total += n;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Ok((total > 0).then_some(total));
            }
            Err(err) => return Err(err),
        }
    }
}

async fn flush_tls(stream: &mut TcpStream, tls: &mut Connection) -> io::Result<()> {
    while tls.wants_write() {
        let mut out = Vec::new();
        tls.write_tls(&mut out)?;
        stream.write_all(&out).await?;
    }
    Ok(())
}
