//! Error Types
//!
//! One enum per failure family, joined by [`ConnectionError`].

use std::io;
use std::net::SocketAddr;

/// Frame protocol violations. Always fatal to the current connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Unknown opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("Reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    #[error("Control frame must not be fragmented")]
    FragmentedControlFrame,

    #[error("Control frame payload too large: {0} bytes (max 125)")]
    ControlFrameTooLarge(usize),

    #[error("Frame payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: usize },

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Continuation frame without an open message")]
    UnexpectedContinuation,

    #[error("New data frame while a fragmented message is open")]
    InterleavedDataFrame,

    #[error("Text message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Close payload must be empty or at least 2 bytes")]
    InvalidClosePayload,

    #[error("Client frame is not masked")]
    UnmaskedClientFrame,

    #[error("Server frame is masked")]
    MaskedServerFrame,
}

/// HTTP upgrade failures.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("Expected 101 Switching Protocols, got: {0}")]
    NotSwitchingProtocols(String),

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Sec-WebSocket-Accept mismatch (expected {expected}, got {actual})")]
    AcceptMismatch { expected: String, actual: String },

    #[error("HTTP headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    #[error("Malformed HTTP message: {0}")]
    Malformed(String),

    #[error("Unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    #[error("Timed out waiting for the HTTP upgrade")]
    Timeout,

    #[error("Connection closed during the HTTP upgrade")]
    ConnectionClosed,
}

/// Resolution, connect and TLS failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("No addresses found for {0}")]
    NoAddress(String),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Umbrella error for one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("Connection lost: {0}")]
    Lost(io::Error),

    #[error("Gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

impl ConnectionError {
    /// True for frame protocol violations.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ConnectionError::Protocol(_))
    }

    /// Stage label used for logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            ConnectionError::Transport(TransportError::Resolve { .. })
            | ConnectionError::Transport(TransportError::NoAddress(_)) => "resolve",
            ConnectionError::Transport(TransportError::Connect { .. }) => "connect",
            ConnectionError::Transport(TransportError::Tls(_))
            | ConnectionError::Transport(TransportError::TlsConfig(_))
            | ConnectionError::Transport(TransportError::InvalidServerName(_)) => "tls",
            ConnectionError::Transport(_) => "transport",
            ConnectionError::Handshake(_) => "handshake",
            ConnectionError::Protocol(_) => "protocol",
            ConnectionError::Lost(_) => "lost",
            ConnectionError::ReconnectExhausted(_) => "reconnect",
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Transport(TransportError::Io(err))
    }
}

/// Rejected facade call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection worker has stopped")]
    WorkerStopped,
}

/// Gateway envelope failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid gateway payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}
