//! # Infrastructure Layer
//!
//! Sockets, TLS and metrics: everything that touches the operating system.

pub mod metrics;
pub mod tls;
pub mod transport;

pub use transport::Transport;
