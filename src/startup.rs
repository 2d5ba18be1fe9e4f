//! Application Startup
//!
//! Builds the configured runner and drives it until Ctrl-C.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::application::ServerEvent;
use crate::config::{RunMode, Settings};
use crate::infrastructure::metrics;
use crate::presentation::gateway::{GatewayClient, GatewayEvent};
use crate::presentation::websocket::WebSocketServer;

enum Runner {
    Gateway {
        client: GatewayClient,
        events: UnboundedReceiver<GatewayEvent>,
    },
    EchoServer {
        server: WebSocketServer,
        events: UnboundedReceiver<ServerEvent>,
    },
}

/// Application instance
pub struct Application {
    runner: Runner,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let runner = match settings.mode {
            RunMode::Gateway => {
                let (client, events) = GatewayClient::connect(settings.gateway_config())?;
                Runner::Gateway { client, events }
            }
            RunMode::EchoServer => {
                let (server, events) = WebSocketServer::bind(settings.server_options()?).await?;
                Runner::EchoServer { server, events }
            }
        };
        Ok(Self { runner })
    }

    /// Listening address in echo-server mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.runner {
            Runner::EchoServer { server, .. } => Some(server.local_addr()),
            Runner::Gateway { .. } => None,
        }
    }

    /// Run until Ctrl-C or until the connection gives up.
    pub async fn run_until_stopped(self) -> Result<()> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        match self.runner {
            Runner::Gateway { client, mut events } => {
                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            tracing::info!("Shutdown signal received");
                            break;
                        }
                        event = events.recv() => match event {
                            Some(event) => log_gateway_event(&event),
                            None => break,
                        },
                    }
                }
                client.shutdown().await;
            }
            Runner::EchoServer { server, mut events } => {
                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            tracing::info!("Shutdown signal received");
                            break;
                        }
                        event = events.recv() => match event {
                            Some(event) => echo(&server, event),
                            None => break,
                        },
                    }
                }
                server.shutdown().await;
            }
        }

        tracing::debug!(metrics = %metrics::gather_metrics(), "Final metrics");
        Ok(())
    }
}

fn log_gateway_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::Connected => tracing::info!("Gateway socket connected"),
        GatewayEvent::Ready { session_id, .. } => tracing::info!(%session_id, "READY"),
        GatewayEvent::Resumed => tracing::info!("RESUMED"),
        GatewayEvent::Dispatch { event, sequence, .. } => {
            tracing::info!(event = %event, sequence = ?sequence, "Dispatch");
        }
        GatewayEvent::SessionInvalidated { resumable } => {
            tracing::warn!(resumable, "Session invalidated");
        }
        GatewayEvent::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
        }
        GatewayEvent::Closed { code, reason } => tracing::info!(code, reason = %reason, "Gateway closed"),
        GatewayEvent::Error(message) => tracing::error!(error = %message, "Gateway error"),
    }
}

fn echo(server: &WebSocketServer, event: ServerEvent) {
    match event {
        ServerEvent::ClientConnected { id, peer } => {
            tracing::info!(connection_id = %id, %peer, "Echo client connected");
        }
        ServerEvent::Message { id, message } => {
            let Some(connection) = server.connection(&id) else {
                return;
            };
            if let Err(err) = connection.send(message) {
                tracing::warn!(connection_id = %id, error = %err, "Echo failed");
            }
        }
        ServerEvent::ClientDisconnected { id, code, reason } => {
            tracing::info!(connection_id = %id, code, reason = %reason, "Echo client disconnected");
        }
        ServerEvent::Error { id, message } => {
            tracing::warn!(connection_id = ?id, error = %message, "Echo server error");
        }
    }
}
