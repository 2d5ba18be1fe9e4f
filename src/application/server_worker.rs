//! Server Worker
//!
//! Accept loop plus one task per accepted socket. Each task runs the server
//! side of the upgrade and then the same steady-state loop the client uses.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::connection::{enqueue, read_http_head, serve, step, ConnectionShared, FrameConnection, ServeExit};
use super::events::ServerEvent;
use super::options::ServerOptions;
use crate::domain::frame::{Role, CLOSE_GOING_AWAY};
use crate::domain::handshake::{reject_response, UpgradeRequest};
use crate::domain::message::{CloseRequest, Message};
use crate::domain::state::ConnectionState;
use crate::infrastructure::metrics;
use crate::infrastructure::transport::Transport;
use crate::shared::error::SendError;

const ROLE: &str = "server";

/// Close code reported when a connection dies without a Close frame.
const CLOSE_ABNORMAL: u16 = 1006;

const SERVER_GOING_AWAY: &str = "Server going away";

/// Handle to one accepted connection.
#[derive(Debug, Clone)]
pub struct ServerConnection {
    id: Uuid,
    peer: SocketAddr,
    shared: Arc<ConnectionShared>,
    outbound: UnboundedSender<Message>,
}

impl ServerConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn send(&self, message: Message) -> Result<(), SendError> {
        enqueue(&self.shared, &self.outbound, message)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        self.send(Message::Binary(data.into()))
    }

    /// Send Close and end the connection. Repeated calls are no-ops.
    pub fn close(&self, code: u16, reason: &str) {
        if self.shared.request_close(CloseRequest::new(code, reason)) {
            tracing::debug!(connection_id = %self.id, code, "Close requested");
        }
    }
}

/// Live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, ServerConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, connection: ServerConnection) {
        let id = connection.id;
        let peer = connection.peer;
        self.connections.insert(id, connection);
        tracing::info!(connection_id = %id, %peer, total = self.connections.len(), "Connection registered");
    }

    fn unregister(&self, id: &Uuid) {
        if self.connections.remove(id).is_some() {
            tracing::info!(connection_id = %id, total = self.connections.len(), "Connection unregistered");
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<ServerConnection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue `text` on every open connection. Returns how many accepted it.
    pub fn broadcast_text(&self, text: &str) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if entry.value().send_text(text).is_ok() {
                delivered += 1;
            }
        }
        tracing::debug!(delivered, "Broadcast sent");
        delivered
    }
}

pub(crate) async fn accept_loop(
    listener: TcpListener,
    options: Arc<ServerOptions>,
    registry: Arc<ConnectionRegistry>,
    events: UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %err, "Failed to set TCP_NODELAY");
                    }
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&options),
                        Arc::clone(&registry),
                        events.clone(),
                        cancel.child_token(),
                    ));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Accept failed");
                    let _ = events.send(ServerEvent::Error {
                        id: None,
                        message: format!("Accept failed: {err}"),
                    });
                    // Back off briefly so fd exhaustion does not spin
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }
    tracing::info!("Accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    options: Arc<ServerOptions>,
    registry: Arc<ConnectionRegistry>,
    events: UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
) {
    let id = Uuid::new_v4();
    let shared = Arc::new(ConnectionShared::new(cancel));
    shared.set_state(ConnectionState::Connecting);

    let mut conn = match accept_upgrade(Transport::plain(stream, peer), &options, &shared).await {
        Ok(conn) => conn,
        Err(ServeExit::Failed(err)) => {
            metrics::record_connection_failure(err.stage());
            tracing::warn!(connection_id = %id, %peer, error = %err, "Upgrade failed");
            let _ = events.send(ServerEvent::Error {
                id: Some(id),
                message: err.to_string(),
            });
            shared.set_state(ConnectionState::Closed);
            return;
        }
        Err(_) => {
            shared.set_state(ConnectionState::Closed);
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.register(ServerConnection {
        id,
        peer,
        shared: Arc::clone(&shared),
        outbound: tx,
    });
    shared.set_state(ConnectionState::Connected);
    shared.set_connected(true);
    metrics::connection_opened(ROLE);
    let _ = events.send(ServerEvent::ClientConnected { id, peer });

    let exit = serve(&mut conn, &shared, &mut rx, None, |message| {
        let _ = events.send(ServerEvent::Message { id, message });
    })
    .await;

    shared.set_connected(false);
    metrics::connection_closed(ROLE);
    let (code, reason) = match exit {
        ServeExit::UserClosed(request) => (request.code, request.reason),
        ServeExit::PeerClosed { code, reason } => (code, reason),
        ServeExit::Stopped | ServeExit::Reconnect(_) => {
            if let Err(err) = conn.send_close(CLOSE_GOING_AWAY, SERVER_GOING_AWAY).await {
                tracing::debug!(connection_id = %id, error = %err, "Close on shutdown not delivered");
            }
            (CLOSE_GOING_AWAY, SERVER_GOING_AWAY.to_string())
        }
        ServeExit::Failed(err) => {
            metrics::record_connection_failure(err.stage());
            tracing::warn!(connection_id = %id, error = %err, "Connection failed");
            let _ = events.send(ServerEvent::Error {
                id: Some(id),
                message: err.to_string(),
            });
            (CLOSE_ABNORMAL, err.to_string())
        }
    };

    conn.shutdown().await;
    registry.unregister(&id);
    shared.set_state(ConnectionState::Closed);
    tracing::info!(connection_id = %id, code, reason = %reason, "Client disconnected");
    let _ = events.send(ServerEvent::ClientDisconnected { id, code, reason });
}

async fn accept_upgrade(
    mut transport: Transport,
    options: &ServerOptions,
    shared: &ConnectionShared,
) -> Result<FrameConnection, ServeExit> {
    if let Some(config) = &options.tls {
        shared.set_state(ConnectionState::SslHandshake);
        step(shared, transport.accept_tls(Arc::clone(config), options.tls_handshake_timeout)).await?;
    }

    shared.set_state(ConnectionState::ReadingHttpUpgradeResponse);
    let mut buf = BytesMut::with_capacity(4096);
    let head = step(shared, read_http_head(&mut transport, &mut buf, options.handshake_timeout)).await?;

    let request = match UpgradeRequest::parse(&head) {
        Ok(request) => request,
        Err(err) => {
            let _ = transport.send(reject_response(400, "Bad Request").as_bytes()).await;
            transport.shutdown().await;
            return Err(ServeExit::Failed(err.into()));
        }
    };

    shared.set_state(ConnectionState::SendingHttpUpgrade);
    let protocol = request.select_protocol(&options.protocols);
    let response = request.accept_response(protocol.as_deref());
    step(shared, transport.send(response.as_bytes())).await?;
    tracing::debug!(path = %request.path, protocol = ?protocol, "Upgrade accepted");

    Ok(FrameConnection::new(transport, buf, Role::Server, options.limits))
}

