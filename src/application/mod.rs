//! Application Layer
//!
//! Connection workers: the tasks that own sockets and drive the domain
//! state machines. Facades in the presentation layer talk to them through
//! queues and shared flags only.

pub mod client_worker;
pub mod connection;
pub mod events;
pub mod options;
pub mod server_worker;

pub use events::{ClientEvent, ServerEvent};
pub use options::{ClientOptions, FrameLimits, ServerOptions};
pub use server_worker::{ConnectionRegistry, ServerConnection};
