//! WebSocket Client
//!
//! Caller-facing handle. Every method is non-blocking: sends go onto the
//! worker's queue and the close request is picked up on its next turn.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::client_worker::ClientWorker;
use crate::application::connection::{enqueue, ConnectionShared};
use crate::application::{ClientEvent, ClientOptions};
use crate::domain::handshake::WsUrl;
use crate::domain::message::{CloseRequest, Message};
use crate::domain::reconnect::ReconnectRequest;
use crate::domain::state::ConnectionState;
use crate::shared::error::{HandshakeError, SendError};

struct ClientHandle {
    url: String,
    shared: Arc<ConnectionShared>,
    outbound: UnboundedSender<Message>,
    reconnects: UnboundedSender<ReconnectRequest>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        // Last handle gone: the worker must not outlive its owner
        self.shared.stop();
    }
}

/// A WebSocket client connection. Clones share the same worker.
#[derive(Clone)]
pub struct WebSocketClient {
    inner: Arc<ClientHandle>,
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl WebSocketClient {
    /// Start connecting to `url` in the background. Must be called inside a
    /// Tokio runtime. Events arrive on the returned receiver.
    pub fn connect(
        url: &str,
        options: ClientOptions,
    ) -> Result<(Self, UnboundedReceiver<ClientEvent>), HandshakeError> {
        Self::connect_with_headers(url, Vec::new(), options)
    }

    /// Like [`connect`](Self::connect), adding `headers` to the upgrade request.
    pub fn connect_with_headers(
        url: &str,
        headers: Vec<(String, String)>,
        options: ClientOptions,
    ) -> Result<(Self, UnboundedReceiver<ClientEvent>), HandshakeError> {
        let parsed = WsUrl::parse(url)?;

        let shared = Arc::new(ConnectionShared::new(CancellationToken::new()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = ClientWorker::new(
            parsed,
            headers,
            options,
            Arc::clone(&shared),
            outbound_rx,
            reconnect_rx,
            event_tx,
        );
        let handle = tokio::spawn(worker.run());

        let client = Self {
            inner: Arc::new(ClientHandle {
                url: url.to_string(),
                shared,
                outbound: outbound_tx,
                reconnects: reconnect_tx,
                worker: Mutex::new(Some(handle)),
            }),
        };
        Ok((client, event_rx))
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.is_connected()
    }

    pub fn send(&self, message: Message) -> Result<(), SendError> {
        enqueue(&self.inner.shared, &self.inner.outbound, message)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(Message::Binary(data.into()))
    }

    /// Send Close with `code` and `reason`, then stop for good. No reconnect
    /// follows. Only the first call has any effect.
    pub fn close(&self, code: u16, reason: &str) {
        if self.inner.shared.request_close(CloseRequest::new(code, reason)) {
            tracing::info!(url = %self.inner.url, code, reason, "Close requested");
        }
    }

    /// Drop the current connection and connect again, overriding backoff and
    /// target URL when the request says so.
    pub fn reconnect(&self, request: ReconnectRequest) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        self.inner
            .reconnects
            .send(request)
            .map_err(|_| SendError::WorkerStopped)
    }

    /// Stop the worker without waiting. An open connection gets Close 1001.
    pub fn stop(&self) {
        self.inner.shared.stop();
    }

    /// Stop the worker and wait for it to finish.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    /// Wait for the worker to finish on its own (close, give-up, stop).
    pub async fn join(&self) {
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Connection worker panicked");
            }
        }
    }
}
