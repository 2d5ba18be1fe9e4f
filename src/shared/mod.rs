//! Shared Utilities
//!
//! Error types used across all layers.

pub mod error;

pub use error::{ConnectionError, FrameError, GatewayError, HandshakeError, SendError, TransportError};
