//! WebSocket Facades
//!
//! Client and server handles over the connection workers.

pub mod client;
pub mod server;

pub use client::WebSocketClient;
pub use server::WebSocketServer;
