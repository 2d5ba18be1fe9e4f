//! Gateway Session State Machine
//!
//! Pure protocol logic: feed it payloads and timer ticks, get back actions.
//! The driver task owns the socket and the heartbeat timer.

use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use super::messages::{
    GatewayPayload, HelloPayload, IdentifyPayload, IdentifyProperties, OpCode, ReadyPayload,
    ResumePayload,
};

/// Heartbeat interval assumed when Hello omits one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// Credentials and metadata sent with Identify.
#[derive(Debug, Clone)]
pub struct GatewayIdentity {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Disconnected,
    Connecting,
    Identifying,
    Connected,
    Reconnecting,
}

/// Why the session asked for a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// Server sent op 7
    ServerRequested,
    /// Server sent op 9
    InvalidSession,
    /// Heartbeat went unacknowledged
    Zombie,
}

impl ReconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconnectReason::ServerRequested => "server requested reconnect",
            ReconnectReason::InvalidSession => "invalid session",
            ReconnectReason::Zombie => "heartbeat ack missed",
        }
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write this payload to the socket.
    Send(GatewayPayload),
    /// (Re)arm the heartbeat timer.
    StartHeartbeat { first_after: Duration, interval: Duration },
    /// Disarm the heartbeat timer.
    StopHeartbeat,
    /// READY received.
    Ready { session_id: String, data: Value },
    /// RESUMED received.
    Resumed,
    /// Any other dispatch, forwarded verbatim.
    Dispatch {
        event: String,
        sequence: Option<i64>,
        data: Value,
    },
    /// op 9 received; `resumable` is the top-level `d` flag.
    SessionInvalidated { resumable: bool },
    /// Tear down the socket and connect again.
    Reconnect {
        resume: bool,
        delay: Option<Duration>,
        url: Option<String>,
        reason: ReconnectReason,
    },
}

/// Per-session protocol state. Survives socket reconnects.
#[derive(Debug)]
pub struct GatewaySession {
    identity: GatewayIdentity,
    state: GatewayState,
    sequence: Option<i64>,
    session_id: Option<String>,
    resume_url: Option<String>,
    heartbeat_interval: Option<Duration>,
    heartbeat_ack_pending: bool,
    resume_on_hello: bool,
    invalid_session_delay: Duration,
}

impl GatewaySession {
    pub fn new(identity: GatewayIdentity, invalid_session_delay: Duration) -> Self {
        Self {
            identity,
            state: GatewayState::Disconnected,
            sequence: None,
            session_id: None,
            resume_url: None,
            heartbeat_interval: None,
            heartbeat_ack_pending: false,
            resume_on_hello: false,
            invalid_session_delay,
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn sequence(&self) -> Option<i64> {
        self.sequence
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn heartbeat_ack_pending(&self) -> bool {
        self.heartbeat_ack_pending
    }

    /// The socket finished its upgrade; wait for Hello.
    pub fn transport_connected(&mut self) {
        self.state = GatewayState::Connecting;
        self.heartbeat_ack_pending = false;
    }

    /// The socket went away without a session-level request.
    pub fn transport_lost(&mut self) -> Vec<SessionAction> {
        if self.state != GatewayState::Reconnecting {
            self.resume_on_hello = self.session_id.is_some();
        }
        self.state = GatewayState::Reconnecting;
        self.heartbeat_ack_pending = false;
        vec![SessionAction::StopHeartbeat]
    }

    /// The caller closed the connection for good.
    pub fn shutdown(&mut self) -> Vec<SessionAction> {
        self.state = GatewayState::Disconnected;
        self.heartbeat_ack_pending = false;
        vec![SessionAction::StopHeartbeat]
    }

    /// Parse and handle one text message from the socket.
    pub fn handle_text(&mut self, text: &str) -> Result<Vec<SessionAction>, serde_json::Error> {
        let payload = GatewayPayload::from_json(text)?;
        Ok(self.handle(payload))
    }

    pub fn handle(&mut self, payload: GatewayPayload) -> Vec<SessionAction> {
        match payload.opcode() {
            Some(OpCode::Hello) => self.on_hello(&payload.d),
            Some(OpCode::Dispatch) => self.on_dispatch(payload),
            Some(OpCode::Heartbeat) => {
                // Server wants a heartbeat right now
                self.heartbeat_ack_pending = true;
                vec![SessionAction::Send(GatewayPayload::heartbeat(self.sequence))]
            }
            Some(OpCode::HeartbeatAck) => {
                self.heartbeat_ack_pending = false;
                Vec::new()
            }
            Some(OpCode::Reconnect) => {
                self.begin_reconnect();
                self.resume_on_hello = self.session_id.is_some();
                vec![
                    SessionAction::StopHeartbeat,
                    SessionAction::Reconnect {
                        resume: self.resume_on_hello,
                        delay: None,
                        url: self.resume_url.clone(),
                        reason: ReconnectReason::ServerRequested,
                    },
                ]
            }
            Some(OpCode::InvalidSession) => {
                let resumable = payload.d.as_bool().unwrap_or(false);
                if !resumable {
                    self.session_id = None;
                    self.sequence = None;
                    self.resume_url = None;
                }
                self.begin_reconnect();
                self.resume_on_hello = resumable && self.session_id.is_some();
                vec![
                    SessionAction::StopHeartbeat,
                    SessionAction::SessionInvalidated { resumable },
                    SessionAction::Reconnect {
                        resume: self.resume_on_hello,
                        delay: Some(self.invalid_session_delay),
                        url: self.resume_url.clone(),
                        reason: ReconnectReason::InvalidSession,
                    },
                ]
            }
            Some(OpCode::Identify | OpCode::PresenceUpdate | OpCode::Resume) | None => {
                tracing::debug!(op = payload.op, "Ignoring gateway payload");
                Vec::new()
            }
        }
    }

    /// The heartbeat timer fired.
    pub fn heartbeat_due(&mut self) -> Vec<SessionAction> {
        if self.heartbeat_ack_pending {
            tracing::warn!(
                session_id = ?self.session_id,
                "Heartbeat not acknowledged, treating connection as zombie"
            );
            self.begin_reconnect();
            self.resume_on_hello = self.session_id.is_some();
            return vec![
                SessionAction::StopHeartbeat,
                SessionAction::Reconnect {
                    resume: self.resume_on_hello,
                    delay: None,
                    url: self.resume_url.clone(),
                    reason: ReconnectReason::Zombie,
                },
            ];
        }

        self.heartbeat_ack_pending = true;
        vec![SessionAction::Send(GatewayPayload::heartbeat(self.sequence))]
    }

    fn begin_reconnect(&mut self) {
        self.state = GatewayState::Reconnecting;
        self.heartbeat_ack_pending = false;
    }

    fn on_hello(&mut self, data: &Value) -> Vec<SessionAction> {
        let interval_ms = serde_json::from_value::<HelloPayload>(data.clone())
            .map(|hello| hello.heartbeat_interval)
            .ok()
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        let interval = Duration::from_millis(interval_ms);
        let jitter = Duration::from_millis(rand::rng().random_range(0..interval_ms));

        self.heartbeat_interval = Some(interval);
        self.heartbeat_ack_pending = false;
        self.state = GatewayState::Identifying;

        let handshake = match (self.resume_on_hello, self.session_id.clone()) {
            (true, Some(session_id)) => GatewayPayload::resume(&ResumePayload {
                token: self.identity.token.clone(),
                session_id,
                seq: self.sequence,
            }),
            _ => GatewayPayload::identify(&IdentifyPayload {
                token: self.identity.token.clone(),
                intents: self.identity.intents,
                properties: self.identity.properties.clone(),
            }),
        };
        self.resume_on_hello = false;

        let mut actions = vec![SessionAction::StartHeartbeat {
            first_after: jitter,
            interval,
        }];
        match handshake {
            Ok(payload) => actions.push(SessionAction::Send(payload)),
            Err(err) => tracing::error!(error = %err, "Failed to encode handshake payload"),
        }
        actions
    }

    fn on_dispatch(&mut self, payload: GatewayPayload) -> Vec<SessionAction> {
        if let Some(seq) = payload.s {
            self.sequence = Some(self.sequence.map_or(seq, |current| current.max(seq)));
        }

        let event = payload.t.unwrap_or_default();
        match event.as_str() {
            "READY" => match serde_json::from_value::<ReadyPayload>(payload.d.clone()) {
                Ok(ready) => {
                    self.session_id = Some(ready.session_id.clone());
                    self.resume_url = ready.resume_gateway_url;
                    self.state = GatewayState::Connected;
                    tracing::info!(session_id = %ready.session_id, "Gateway session ready");
                    vec![SessionAction::Ready {
                        session_id: ready.session_id,
                        data: payload.d,
                    }]
                }
                Err(err) => {
                    tracing::warn!(error = %err, "READY without a usable session_id");
                    Vec::new()
                }
            },
            "RESUMED" => {
                self.state = GatewayState::Connected;
                tracing::info!(session_id = ?self.session_id, "Gateway session resumed");
                vec![SessionAction::Resumed]
            }
            _ => vec![SessionAction::Dispatch {
                event,
                sequence: payload.s,
                data: payload.d,
            }],
        }
    }
}
