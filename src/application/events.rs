//! Events pushed by workers to the owning side.

use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::message::Message;

/// Notifications from a client connection worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Upgrade completed.
    Connected,
    /// A complete text or binary message.
    Message(Message),
    /// Graceful close: either side sent a Close frame.
    Closed { code: u16, reason: String },
    /// Connection failure, protocol violation or abnormal drop.
    Error(String),
    /// Backoff started; attempt `attempt` runs after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
}

/// Notifications from the server accept loop and its connections.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected { id: Uuid, peer: SocketAddr },
    Message { id: Uuid, message: Message },
    ClientDisconnected { id: Uuid, code: u16, reason: String },
    /// `id` is `None` for accept-loop failures.
    Error { id: Option<Uuid>, message: String },
}
