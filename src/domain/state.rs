//! Connection lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one connection, driven forward by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    ResolvingHost = 0,
    Connecting = 1,
    SslHandshake = 2,
    SendingHttpUpgrade = 3,
    ReadingHttpUpgradeResponse = 4,
    Connected = 5,
    Closing = 6,
    Closed = 7,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::ResolvingHost,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::SslHandshake,
            3 => ConnectionState::SendingHttpUpgrade,
            4 => ConnectionState::ReadingHttpUpgradeResponse,
            5 => ConnectionState::Connected,
            6 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::ResolvingHost => "resolving_host",
            ConnectionState::Connecting => "connecting",
            ConnectionState::SslHandshake => "ssl_handshake",
            ConnectionState::SendingHttpUpgrade => "sending_http_upgrade",
            ConnectionState::ReadingHttpUpgradeResponse => "reading_http_upgrade_response",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lock-free cell: written by the worker, read by anyone.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
