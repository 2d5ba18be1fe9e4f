//! Gateway protocol: envelope types and the session state machine.

pub mod messages;
pub mod session;

pub use messages::{
    Activity, GatewayPayload, IdentifyPayload, IdentifyProperties, OpCode, PresenceUpdatePayload,
    ResumePayload,
};
pub use session::{
    GatewayIdentity, GatewaySession, GatewayState, ReconnectReason, SessionAction,
};
