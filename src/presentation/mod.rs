//! Presentation Layer
//!
//! Caller-facing handles: raw WebSocket client and server, and the gateway
//! client built on top of them.

pub mod gateway;
pub mod websocket;

pub use gateway::{GatewayClient, GatewayConfig, GatewayEvent};
pub use websocket::{WebSocketClient, WebSocketServer};
