//! # Gateway Socket Library
//!
//! This crate provides a WebSocket client and server stack with:
//! - An RFC 6455 frame codec with masking, fragmentation and control frames
//! - TCP and TLS transports driven by per-connection Tokio tasks
//! - Automatic reconnect with exponential backoff
//! - A Discord-style gateway session (Hello, Identify, Resume, heartbeats)
//!
//! ## Architecture
//!
//! - **Domain Layer**: protocol logic with no I/O
//! - **Application Layer**: connection workers that own sockets
//! - **Infrastructure Layer**: sockets, TLS and metrics
//! - **Presentation Layer**: client, server and gateway handles
//!
//! ## Module Structure
//!
//! ```text
//! gateway_socket/
//! +-- config/         Configuration management
//! +-- domain/         Frames, handshake, backoff, gateway session
//! +-- application/    Connection workers and events
//! +-- infrastructure/ Transport, TLS, metrics
//! +-- presentation/   WebSocketClient, WebSocketServer, GatewayClient
//! +-- shared/         Error types
//! ```

// Configuration module
pub mod config;

// Domain layer - Protocol logic
pub mod domain;

// Application layer - Connection workers
pub mod application;

// Infrastructure layer - Sockets and TLS
pub mod infrastructure;

// Presentation layer - Caller-facing handles
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup
pub mod startup;

// Telemetry and observability
pub mod telemetry;

pub use application::{ClientEvent, ClientOptions, ServerEvent, ServerOptions};
pub use domain::{ConnectionState, Message, ReconnectConfig};
pub use presentation::{GatewayClient, GatewayConfig, GatewayEvent, WebSocketClient, WebSocketServer};
