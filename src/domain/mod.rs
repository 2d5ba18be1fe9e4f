//! # Domain Layer
//!
//! Protocol logic with no I/O: frame codec, message reassembly, the HTTP
//! upgrade handshake, reconnect backoff and the gateway session machine.
//!
//! ## Structure
//!
//! - **frame**: RFC 6455 frame encode/decode and masking
//! - **message**: application messages and fragment reassembly
//! - **handshake**: upgrade request/response construction and validation
//! - **reconnect**: exponential backoff supervisor
//! - **state**: connection lifecycle states
//! - **gateway**: `{op, d, s, t}` envelope and session state machine

pub mod frame;
pub mod gateway;
pub mod handshake;
pub mod message;
pub mod reconnect;
pub mod state;

// Re-export commonly used types
pub use frame::{Frame, Opcode, Role};
pub use message::{CloseRequest, Message, MessageAssembler};
pub use reconnect::{
    ReconnectConfig, ReconnectDecision, ReconnectRequest, ReconnectSupervisor, ReconnectTrigger,
};
pub use state::ConnectionState;
