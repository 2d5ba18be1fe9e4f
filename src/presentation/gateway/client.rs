//! Gateway Client
//!
//! Runs a [`GatewaySession`] on top of a [`WebSocketClient`]. A driver task
//! turns socket events and heartbeat ticks into session calls and carries
//! out the actions the session returns.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use url::Url;

use crate::application::{ClientEvent, ClientOptions};
use crate::domain::frame::CLOSE_NORMAL;
use crate::domain::gateway::{
    Activity, GatewayIdentity, GatewayPayload, GatewaySession, GatewayState, IdentifyProperties,
    OpCode, PresenceUpdatePayload, ReconnectReason, SessionAction,
};
use crate::domain::message::Message;
use crate::domain::reconnect::ReconnectRequest;
use crate::infrastructure::metrics;
use crate::presentation::websocket::WebSocketClient;
use crate::shared::error::{GatewayError, HandshakeError};

/// Gateway API version requested when the URL names none.
pub const GATEWAY_VERSION: &str = "10";

/// Payload encoding requested when the URL names none.
pub const GATEWAY_ENCODING: &str = "json";

/// Close code that keeps the session resumable.
const CLOSE_RESUMABLE: u16 = 4000;

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
    /// Wait before reconnecting after op 9.
    pub invalid_session_delay: Duration,
    pub client: ClientOptions,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>, intents: u64) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            intents,
            properties: IdentifyProperties::default(),
            invalid_session_delay: Duration::from_secs(3),
            client: ClientOptions::default(),
        }
    }
}

/// Session-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Socket upgraded; Hello expected next.
    Connected,
    Ready { session_id: String, data: Value },
    Resumed,
    Dispatch {
        event: String,
        sequence: Option<i64>,
        data: Value,
    },
    SessionInvalidated { resumable: bool },
    Reconnecting { attempt: u32, delay: Duration },
    Closed { code: u16, reason: String },
    Error(String),
}

/// Add `v` and `encoding` unless `raw` already carries a query.
pub fn gateway_url(raw: &str) -> Result<String, HandshakeError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|err| HandshakeError::InvalidUrl(format!("{raw}: {err}")))?;
    if url.query().is_none() {
        url.query_pairs_mut()
            .append_pair("v", GATEWAY_VERSION)
            .append_pair("encoding", GATEWAY_ENCODING);
    }
    Ok(url.into())
}

/// A Discord-style gateway client.
pub struct GatewayClient {
    socket: WebSocketClient,
    session: Arc<Mutex<GatewaySession>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.socket.url())
            .field("state", &self.state())
            .finish()
    }
}

impl GatewayClient {
    /// Connect in the background. Must be called inside a Tokio runtime.
    pub fn connect(config: GatewayConfig) -> Result<(Self, UnboundedReceiver<GatewayEvent>), GatewayError> {
        let url = gateway_url(&config.url)?;
        let identity = GatewayIdentity {
            token: config.token,
            intents: config.intents,
            properties: config.properties,
        };
        let session = Arc::new(Mutex::new(GatewaySession::new(
            identity,
            config.invalid_session_delay,
        )));

        let (socket, socket_events) = WebSocketClient::connect(&url, config.client)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tracing::info!(url = %url, intents = config.intents, "Gateway client starting");

        let driver = GatewayDriver {
            socket: socket.clone(),
            session: Arc::clone(&session),
            events: event_tx,
            heartbeat: None,
        };
        let handle = tokio::spawn(driver.run(socket_events));

        let client = Self {
            socket,
            session,
            driver: Mutex::new(Some(handle)),
        };
        Ok((client, event_rx))
    }

    pub fn state(&self) -> GatewayState {
        self.session.lock().state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().session_id().map(str::to_string)
    }

    pub fn sequence(&self) -> Option<i64> {
        self.session.lock().sequence()
    }

    /// True once READY or RESUMED has been received on the current socket.
    pub fn is_connected(&self) -> bool {
        self.state() == GatewayState::Connected && self.socket.is_connected()
    }

    /// Send a raw envelope.
    pub fn send_payload(&self, payload: &GatewayPayload) -> Result<(), GatewayError> {
        let json = payload.to_json()?;
        self.socket.send_text(json)?;
        Ok(())
    }

    /// Send op 3 with status "online" and an optional activity.
    pub fn update_presence(&self, activity: Option<Activity>) -> Result<(), GatewayError> {
        let payload = GatewayPayload::presence(&PresenceUpdatePayload::online(activity))?;
        self.send_payload(&payload)
    }

    /// Close with 1000 and stop reconnecting.
    pub fn close(&self) {
        let _ = self.session.lock().shutdown();
        self.socket.close(CLOSE_NORMAL, "client closing");
    }

    /// Close and wait for the socket worker and driver to finish.
    pub async fn shutdown(&self) {
        self.close();
        self.socket.join().await;
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Gateway driver panicked");
            }
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        // The driver holds a socket handle too, so dropping ours is not enough
        self.socket.stop();
    }
}

struct Heartbeat {
    next: Instant,
    interval: Duration,
}

struct GatewayDriver {
    socket: WebSocketClient,
    session: Arc<Mutex<GatewaySession>>,
    events: UnboundedSender<GatewayEvent>,
    heartbeat: Option<Heartbeat>,
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl GatewayDriver {
    async fn run(mut self, mut socket_events: UnboundedReceiver<ClientEvent>) {
        loop {
            let deadline = self.heartbeat.as_ref().map(|heartbeat| heartbeat.next);
            tokio::select! {
                event = socket_events.recv() => match event {
                    Some(event) => self.on_socket_event(event),
                    None => break,
                },
                _ = wait_for(deadline) => self.on_heartbeat(),
            }
        }

        let actions = self.session.lock().shutdown();
        self.apply(actions);
        tracing::info!("Gateway driver stopped");
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    fn on_socket_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected => {
                self.session.lock().transport_connected();
                self.emit(GatewayEvent::Connected);
            }
            ClientEvent::Message(Message::Text(text)) => self.on_text(&text),
            ClientEvent::Message(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "Ignoring binary gateway frame");
            }
            ClientEvent::Closed { code, reason } => {
                self.on_transport_lost();
                self.emit(GatewayEvent::Closed { code, reason });
            }
            ClientEvent::Error(message) => {
                self.on_transport_lost();
                self.emit(GatewayEvent::Error(message));
            }
            ClientEvent::Reconnecting { attempt, delay } => {
                self.emit(GatewayEvent::Reconnecting { attempt, delay });
            }
        }
    }

    fn on_transport_lost(&mut self) {
        let actions = {
            let mut session = self.session.lock();
            // Closed by the caller: stay disconnected
            if session.state() == GatewayState::Disconnected {
                return;
            }
            session.transport_lost()
        };
        self.apply(actions);
    }

    fn on_text(&mut self, text: &str) {
        let (result, acked) = {
            let mut session = self.session.lock();
            let was_pending = session.heartbeat_ack_pending();
            let result = session.handle_text(text);
            (result, was_pending && !session.heartbeat_ack_pending())
        };
        if acked {
            metrics::record_heartbeat("acked");
        }

        match result {
            Ok(actions) => self.apply(actions),
            Err(err) => {
                let err = GatewayError::from(err);
                tracing::warn!(error = %err, "Dropping gateway payload");
                self.emit(GatewayEvent::Error(err.to_string()));
            }
        }
    }

    fn on_heartbeat(&mut self) {
        if self.session.lock().state() == GatewayState::Disconnected {
            self.heartbeat = None;
            return;
        }
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.next = Instant::now() + heartbeat.interval;
        }
        let actions = self.session.lock().heartbeat_due();
        self.apply(actions);
    }

    fn apply(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send(payload) => self.send(&payload),
                SessionAction::StartHeartbeat { first_after, interval } => {
                    tracing::debug!(
                        interval_ms = interval.as_millis() as u64,
                        first_after_ms = first_after.as_millis() as u64,
                        "Heartbeat started"
                    );
                    self.heartbeat = Some(Heartbeat {
                        next: Instant::now() + first_after,
                        interval,
                    });
                }
                SessionAction::StopHeartbeat => self.heartbeat = None,
                SessionAction::Ready { session_id, data } => {
                    self.emit(GatewayEvent::Ready { session_id, data });
                }
                SessionAction::Resumed => self.emit(GatewayEvent::Resumed),
                SessionAction::Dispatch { event, sequence, data } => {
                    self.emit(GatewayEvent::Dispatch { event, sequence, data });
                }
                SessionAction::SessionInvalidated { resumable } => {
                    self.emit(GatewayEvent::SessionInvalidated { resumable });
                }
                SessionAction::Reconnect {
                    resume,
                    delay,
                    url,
                    reason,
                } => self.reconnect(resume, delay, url, reason),
            }
        }
    }

    fn send(&self, payload: &GatewayPayload) {
        let json = match payload.to_json() {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(op = payload.op, error = %err, "Failed to encode gateway payload");
                return;
            }
        };
        match self.socket.send_text(json) {
            Ok(()) => {
                if payload.opcode() == Some(OpCode::Heartbeat) {
                    metrics::record_heartbeat("sent");
                }
            }
            Err(err) => tracing::warn!(op = payload.op, error = %err, "Gateway payload not sent"),
        }
    }

    fn reconnect(&self, resume: bool, delay: Option<Duration>, url: Option<String>, reason: ReconnectReason) {
        if reason == ReconnectReason::Zombie {
            metrics::record_heartbeat("missed");
        }
        tracing::info!(resume, reason = reason.as_str(), "Gateway reconnect");

        let url = url.and_then(|url| match gateway_url(&url) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring invalid resume URL");
                None
            }
        });
        let request = ReconnectRequest {
            close_code: if resume { CLOSE_RESUMABLE } else { CLOSE_NORMAL },
            reason: reason.as_str().to_string(),
            delay,
            url,
        };
        if let Err(err) = self.socket.reconnect(request) {
            tracing::warn!(error = %err, "Reconnect request not delivered");
        }
    }
}
