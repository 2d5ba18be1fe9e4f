//! Client Worker
//!
//! One task per client connection. Runs the connect phases, the steady-state
//! loop, and the reconnect loop around both. The task owns the transport;
//! the facade only touches [`ConnectionShared`] and the two queues.

use std::sync::Arc;

use bytes::BytesMut;
use rustls::ClientConfig;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, timeout};

use super::connection::{interruptible, read_http_head, serve, step, ConnectionShared, FrameConnection, ServeExit};
use super::events::ClientEvent;
use super::options::ClientOptions;
use crate::domain::frame::{Role, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use crate::domain::handshake::{ClientHandshake, WsUrl};
use crate::domain::message::{CloseRequest, Message};
use crate::domain::reconnect::{ReconnectDecision, ReconnectRequest, ReconnectSupervisor, ReconnectTrigger};
use crate::domain::state::ConnectionState;
use crate::infrastructure::{metrics, tls, transport};
use crate::shared::error::{ConnectionError, TransportError};

const ROLE: &str = "client";

pub(crate) struct ClientWorker {
    url: WsUrl,
    headers: Vec<(String, String)>,
    options: ClientOptions,
    supervisor: ReconnectSupervisor,
    shared: Arc<ConnectionShared>,
    outbound: UnboundedReceiver<Message>,
    reconnects: UnboundedReceiver<ReconnectRequest>,
    events: UnboundedSender<ClientEvent>,
    tls_config: Option<Arc<ClientConfig>>,
}

/// Pending retry: what caused it and an optional delay override.
type Retry = (ReconnectTrigger, Option<std::time::Duration>);

impl ClientWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: WsUrl,
        headers: Vec<(String, String)>,
        options: ClientOptions,
        shared: Arc<ConnectionShared>,
        outbound: UnboundedReceiver<Message>,
        reconnects: UnboundedReceiver<ReconnectRequest>,
        events: UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            url,
            headers,
            supervisor: ReconnectSupervisor::new(options.reconnect.clone()),
            options,
            shared,
            outbound,
            reconnects,
            events,
            tls_config: None,
        }
    }

    fn emit(&self, event: ClientEvent) {
        // Receiver gone just means nobody is listening
        let _ = self.events.send(event);
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(host = %self.url.host, port = self.url.port, secure = self.url.secure, "Connection worker started");
        let mut retry: Option<Retry> = None;

        loop {
            if self.shared.is_stopped() {
                break;
            }
            if self.shared.is_user_closed() {
                let request = self
                    .shared
                    .take_close_request()
                    .unwrap_or_else(|| CloseRequest::new(CLOSE_NORMAL, ""));
                self.emit(ClientEvent::Closed {
                    code: request.code,
                    reason: request.reason,
                });
                break;
            }

            if let Some((trigger, delay_override)) = retry.take() {
                match self.supervisor.next_attempt(trigger) {
                    ReconnectDecision::Disabled => break,
                    ReconnectDecision::GiveUp { attempts } => {
                        tracing::warn!(attempts, "Giving up on reconnect");
                        self.emit(ClientEvent::Error(ConnectionError::ReconnectExhausted(attempts).to_string()));
                        break;
                    }
                    ReconnectDecision::Retry { attempt, delay } => {
                        let delay = delay_override.unwrap_or(delay);
                        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
                        metrics::record_reconnect_attempt();
                        self.emit(ClientEvent::Reconnecting { attempt, delay });
                        if interruptible(&self.shared, sleep(delay)).await.is_none() {
                            continue;
                        }
                    }
                }
            }

            self.discard_stale_commands();
            match self.connect_and_serve().await {
                ServeExit::UserClosed(request) => {
                    self.emit(ClientEvent::Closed {
                        code: request.code,
                        reason: request.reason,
                    });
                    break;
                }
                ServeExit::Stopped => break,
                ServeExit::PeerClosed { code, reason } => {
                    tracing::info!(code, reason = %reason, "Server closed the connection");
                    self.emit(ClientEvent::Closed { code, reason });
                    retry = Some((ReconnectTrigger::Failure, None));
                }
                ServeExit::Reconnect(request) => {
                    tracing::info!(code = request.close_code, reason = %request.reason, "Reconnect requested");
                    if let Some(url) = request.url.as_deref() {
                        self.redirect(url);
                    }
                    retry = Some((ReconnectTrigger::Requested, request.delay));
                }
                ServeExit::Failed(err) => {
                    let stage = err.stage();
                    metrics::record_connection_failure(stage);
                    tracing::warn!(stage, error = %err, "Connection failed");
                    let message = if matches!(err, ConnectionError::Lost(_)) && self.options.reconnect.enabled {
                        format!("{err} - reconnecting")
                    } else {
                        err.to_string()
                    };
                    self.emit(ClientEvent::Error(message));
                    retry = Some((ReconnectTrigger::Failure, None));
                }
            }
        }

        self.shared.set_connected(false);
        self.shared.set_state(ConnectionState::Closed);
        tracing::info!("Connection worker stopped");
    }

    fn redirect(&mut self, url: &str) {
        match WsUrl::parse(url) {
            Ok(parsed) => {
                tracing::info!(url, "Switching connection URL");
                self.url = parsed;
            }
            Err(err) => tracing::warn!(url, error = %err, "Ignoring invalid reconnect URL"),
        }
    }

    /// Commands queued for a previous connection do not carry over.
    fn discard_stale_commands(&mut self) {
        let mut dropped = 0usize;
        while self.outbound.try_recv().is_ok() {
            dropped += 1;
        }
        while self.reconnects.try_recv().is_ok() {}
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded messages queued while disconnected");
        }
    }

    async fn connect_and_serve(&mut self) -> ServeExit {
        let mut conn = match self.establish().await {
            Ok(conn) => conn,
            Err(exit) => return exit,
        };

        self.supervisor.reset();
        self.shared.set_state(ConnectionState::Connected);
        self.shared.set_connected(true);
        metrics::connection_opened(ROLE);
        tracing::info!(host = %self.url.host, path = %self.url.path, "WebSocket connected");
        self.emit(ClientEvent::Connected);

        let events = self.events.clone();
        let exit = serve(
            &mut conn,
            &self.shared,
            &mut self.outbound,
            Some(&mut self.reconnects),
            |message| {
                let _ = events.send(ClientEvent::Message(message));
            },
        )
        .await;

        self.shared.set_connected(false);
        metrics::connection_closed(ROLE);
        if let ServeExit::Stopped = exit {
            if let Err(err) = conn.send_close(CLOSE_GOING_AWAY, "going away").await {
                tracing::debug!(error = %err, "Close on stop not delivered");
            }
        }
        conn.shutdown().await;
        exit
    }

    async fn establish(&mut self) -> Result<FrameConnection, ServeExit> {
        let shared = Arc::clone(&self.shared);
        let wait = self.options.handshake_timeout;

        shared.set_state(ConnectionState::ResolvingHost);
        let addrs = step(&shared, transport::resolve(&self.url.host, self.url.port)).await?;

        shared.set_state(ConnectionState::Connecting);
        let connect = async {
            timeout(wait, transport::connect(&addrs, self.options.recv_buffer_size))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout("TCP connect")))
        };
        let mut transport = step(&shared, connect).await?;

        if self.url.secure {
            shared.set_state(ConnectionState::SslHandshake);
            let config = self.tls_config().map_err(|err| ServeExit::Failed(err.into()))?;
            step(&shared, transport.start_client_tls(config, &self.url.host, wait)).await?;
        }

        shared.set_state(ConnectionState::SendingHttpUpgrade);
        let handshake = ClientHandshake::new(&self.url, &self.options.protocols, &self.headers);
        step(&shared, transport.send(handshake.request_bytes())).await?;

        shared.set_state(ConnectionState::ReadingHttpUpgradeResponse);
        let mut buf = BytesMut::with_capacity(4096);
        let head = step(&shared, read_http_head(&mut transport, &mut buf, wait)).await?;
        handshake
            .validate_response(&head)
            .map_err(|err| ServeExit::Failed(err.into()))?;

        Ok(FrameConnection::new(transport, buf, Role::Client, self.options.limits))
    }

    fn tls_config(&mut self) -> Result<Arc<ClientConfig>, TransportError> {
        if let Some(config) = &self.tls_config {
            return Ok(Arc::clone(config));
        }
        let config = tls::client_config(self.options.tls_verify)?;
        self.tls_config = Some(Arc::clone(&config));
        Ok(config)
    }
}
