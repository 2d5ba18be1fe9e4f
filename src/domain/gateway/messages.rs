//! Gateway Message Types
//!
//! JSON envelope `{op, d, s, t}` and the payloads this client sends or reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Event dispatch
    Dispatch = 0,
    /// Heartbeat (either direction)
    Heartbeat = 1,
    /// Identify
    Identify = 2,
    /// Presence update
    PresenceUpdate = 3,
    /// Resume
    Resume = 6,
    /// Server asks the client to reconnect
    Reconnect = 7,
    /// Session invalidated
    InvalidSession = 9,
    /// Hello
    Hello = 10,
    /// Heartbeat ACK
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OpCode::Dispatch),
            1 => Some(OpCode::Heartbeat),
            2 => Some(OpCode::Identify),
            3 => Some(OpCode::PresenceUpdate),
            6 => Some(OpCode::Resume),
            7 => Some(OpCode::Reconnect),
            9 => Some(OpCode::InvalidSession),
            10 => Some(OpCode::Hello),
            11 => Some(OpCode::HeartbeatAck),
            _ => None,
        }
    }
}

/// Gateway envelope, used in both directions.
///
/// `d` is always serialized (heartbeats need an explicit `null`); `s` and `t`
/// only appear on dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    /// Dispatch envelope (server side, used by test gateways).
    pub fn dispatch(event: impl Into<String>, sequence: i64, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch as u8,
            d,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// op 1 with the last sequence number, or `null` before the first dispatch.
    pub fn heartbeat(sequence: Option<i64>) -> Self {
        Self::new(OpCode::Heartbeat, sequence.map_or(Value::Null, Value::from))
    }

    pub fn identify(identify: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(identify)?))
    }

    pub fn resume(resume: &ResumePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(resume)?))
    }

    pub fn presence(presence: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Ok(Self::new(OpCode::PresenceUpdate, serde_json::to_value(presence)?))
    }
}

/// Hello payload (op 10)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// The fields of the READY dispatch this client keeps.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Identify payload (op 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
}

/// Identify connection properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Resume payload (op 6)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: Option<i64>,
}

/// Presence update payload (op 3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: String,
    pub afk: bool,
}

impl PresenceUpdatePayload {
    /// Online presence with an optional single activity.
    pub fn online(activity: Option<Activity>) -> Self {
        Self {
            since: None,
            activities: activity.into_iter().collect(),
            status: "online".to_string(),
            afk: false,
        }
    }
}

/// Activity shown in a presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
}
