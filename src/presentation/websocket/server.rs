//! WebSocket Server
//!
//! Listener facade over the accept loop and the connection registry.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::server_worker::accept_loop;
use crate::application::{ConnectionRegistry, ServerConnection, ServerEvent, ServerOptions};
use crate::shared::error::TransportError;

/// A listening WebSocket server.
pub struct WebSocketServer {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.registry.len())
            .finish()
    }
}

impl WebSocketServer {
    /// Bind and start accepting. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(options: ServerOptions) -> Result<(Self, UnboundedReceiver<ServerEvent>), TransportError> {
        let listener = TcpListener::bind(options.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            tls = options.tls.is_some(),
            protocols = ?options.protocols,
            "WebSocket server listening"
        );

        let registry = Arc::new(ConnectionRegistry::new());
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(options),
            Arc::clone(&registry),
            event_tx,
            cancel.clone(),
        ));

        let server = Self {
            local_addr,
            registry,
            cancel,
            accept_task: Mutex::new(Some(task)),
        };
        Ok((server, event_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection(&self, id: &Uuid) -> Option<ServerConnection> {
        self.registry.get(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Queue `text` on every connection. Returns how many accepted it.
    pub fn broadcast_text(&self, text: &str) -> usize {
        self.registry.broadcast_text(text)
    }

    /// Stop accepting and close every connection with 1001.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Accept loop panicked");
            }
        }
        tracing::info!(addr = %self.local_addr, "WebSocket server stopped");
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
