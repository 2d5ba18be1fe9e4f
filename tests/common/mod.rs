//! Common Test Utilities
//!
//! Loopback servers, event helpers and an in-process fake gateway.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use gateway_socket::application::{ClientOptions, ServerEvent, ServerOptions};
use gateway_socket::domain::gateway::GatewayPayload;
use gateway_socket::domain::ReconnectConfig;
use gateway_socket::{Message, WebSocketServer};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Session id the fake gateway hands out in READY.
pub const SESSION_ID: &str = "sess-1";

/// Short backoff so reconnect tests finish quickly.
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        max_attempts: 0,
    }
}

pub fn client_options(reconnect: ReconnectConfig) -> ClientOptions {
    ClientOptions {
        reconnect,
        handshake_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    }
}

pub fn loopback_options() -> ServerOptions {
    ServerOptions {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerOptions::default()
    }
}

/// Next item on `rx`, failing the test after [`WAIT`].
pub async fn recv<T>(rx: &mut UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip items until one matches.
pub async fn recv_until<T, F>(rx: &mut UnboundedReceiver<T>, mut matches: F) -> T
where
    T: std::fmt::Debug,
    F: FnMut(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for matching event")
            .expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

/// Server that echoes every message back to its sender.
pub struct EchoServer {
    pub server: Arc<WebSocketServer>,
    pub disconnects: UnboundedReceiver<(Uuid, u16, String)>,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start(options: ServerOptions) -> Self {
        let (server, mut events) = WebSocketServer::bind(options).await.unwrap();
        let server = Arc::new(server);
        let (tx, disconnects) = mpsc::unbounded_channel();

        let echo = Arc::clone(&server);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ServerEvent::Message { id, message } => {
                        if let Some(connection) = echo.connection(&id) {
                            let _ = connection.send(message);
                        }
                    }
                    ServerEvent::ClientDisconnected { id, code, reason } => {
                        let _ = tx.send((id, code, reason));
                    }
                    _ => {}
                }
            }
        });

        Self {
            server,
            disconnects,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/echo", self.server.local_addr())
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Behaviour switches for [`FakeGateway`].
#[derive(Debug, Clone, Copy)]
pub struct FakeGatewayOptions {
    pub heartbeat_interval_ms: u64,
    pub ack_heartbeats: bool,
}

impl Default for FakeGatewayOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            ack_heartbeats: true,
        }
    }
}

/// Minimal gateway: Hello on connect, READY for Identify, RESUMED for
/// Resume, ack for Heartbeat. Every client payload is recorded.
pub struct FakeGateway {
    pub server: Arc<WebSocketServer>,
    received: UnboundedReceiver<(Uuid, GatewayPayload)>,
    connections: UnboundedReceiver<Uuid>,
    task: JoinHandle<()>,
}

impl FakeGateway {
    pub async fn start(options: FakeGatewayOptions) -> Self {
        let (server, mut events) = WebSocketServer::bind(loopback_options()).await.unwrap();
        let server = Arc::new(server);
        let resume_url = format!("ws://{}", server.local_addr());
        let (payload_tx, received) = mpsc::unbounded_channel();
        let (connection_tx, connections) = mpsc::unbounded_channel();

        let gateway = Arc::clone(&server);
        let task = tokio::spawn(async move {
            let mut sequence = 0i64;
            while let Some(event) = events.recv().await {
                match event {
                    ServerEvent::ClientConnected { id, .. } => {
                        let _ = connection_tx.send(id);
                        let hello = json!({"op": 10, "d": {"heartbeat_interval": options.heartbeat_interval_ms}});
                        if let Some(connection) = gateway.connection(&id) {
                            let _ = connection.send_text(hello.to_string());
                        }
                    }
                    ServerEvent::Message {
                        id,
                        message: Message::Text(text),
                    } => {
                        let payload = GatewayPayload::from_json(&text).unwrap();
                        let reply = match payload.op {
                            1 if options.ack_heartbeats => Some(json!({"op": 11})),
                            2 => {
                                sequence += 1;
                                Some(json!({
                                    "op": 0,
                                    "t": "READY",
                                    "s": sequence,
                                    "d": {"session_id": SESSION_ID, "resume_gateway_url": resume_url},
                                }))
                            }
                            6 => {
                                sequence += 1;
                                Some(json!({"op": 0, "t": "RESUMED", "s": sequence, "d": null}))
                            }
                            _ => None,
                        };
                        if let (Some(reply), Some(connection)) = (reply, gateway.connection(&id)) {
                            let _ = connection.send_text(reply.to_string());
                        }
                        let _ = payload_tx.send((id, payload));
                    }
                    _ => {}
                }
            }
        });

        Self {
            server,
            received,
            connections,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/gateway", self.server.local_addr())
    }

    /// Send a raw JSON payload to every connected client.
    pub fn broadcast(&self, payload: serde_json::Value) {
        self.server.broadcast_text(&payload.to_string());
    }

    /// Id of the next client to connect.
    pub async fn next_connection(&mut self) -> Uuid {
        recv(&mut self.connections).await
    }

    /// Next client payload with opcode `op`; others are skipped.
    pub async fn next_op(&mut self, op: u8) -> GatewayPayload {
        recv_until(&mut self.received, |(_, payload)| payload.op == op).await.1
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}
