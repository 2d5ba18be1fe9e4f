//! Runtime options for client and server connections.

use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig;

use crate::domain::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::domain::message::DEFAULT_MAX_MESSAGE_SIZE;
use crate::domain::reconnect::ReconnectConfig;
use crate::infrastructure::transport::DEFAULT_RECV_BUFFER_SIZE;

/// Bounded wait for each read during handshake phases.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded wait for each read during a server-side TLS handshake.
pub const DEFAULT_TLS_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_size: usize,
    pub max_message_size: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Client connection options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub reconnect: ReconnectConfig,
    /// Offered in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    pub limits: FrameLimits,
    pub handshake_timeout: Duration,
    pub recv_buffer_size: usize,
    /// Verify the server certificate for `wss://`.
    pub tls_verify: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            protocols: Vec::new(),
            limits: FrameLimits::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            tls_verify: true,
        }
    }
}

/// Server options.
#[derive(Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Serve `wss://` when set.
    pub tls: Option<Arc<ServerConfig>>,
    /// Sub-protocols the server agrees to.
    pub protocols: Vec<String>,
    pub limits: FrameLimits,
    pub handshake_timeout: Duration,
    pub tls_handshake_timeout: Duration,
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .field("protocols", &self.protocols)
            .field("limits", &self.limits)
            .finish()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            tls: None,
            protocols: Vec::new(),
            limits: FrameLimits::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_ACCEPT_TIMEOUT,
        }
    }
}

impl ServerOptions {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
