//! Application settings and configuration structures.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::application::{ClientOptions, FrameLimits, ServerOptions};
use crate::domain::gateway::IdentifyProperties;
use crate::domain::reconnect::ReconnectConfig;
use crate::infrastructure::tls;
use crate::presentation::gateway::GatewayConfig;
use crate::shared::error::TransportError;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// What the binary runs
    pub mode: RunMode,

    /// Frame limits and handshake timing
    pub websocket: WebSocketSettings,

    /// Backoff policy
    pub reconnect: ReconnectSettings,

    /// Client-side TLS
    pub tls: TlsSettings,

    /// Gateway client settings (mode = "gateway")
    pub gateway: GatewaySettings,

    /// Listener settings (mode = "echo-server")
    pub server: ServerSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Binary run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Gateway,
    EchoServer,
}

/// WebSocket limits.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Largest accepted frame payload in bytes (default: 16 MiB)
    pub max_frame_size: usize,

    /// Largest reassembled message in bytes (default: 64 MiB)
    pub max_message_size: usize,

    /// Per-read wait during the upgrade, in milliseconds
    pub handshake_timeout_ms: u64,

    /// Socket receive buffer in bytes
    pub recv_buffer_size: usize,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    pub auto_reconnect: bool,
    pub initial_delay_seconds: f64,
    pub max_delay_seconds: f64,
    /// 0 = retry forever
    pub max_attempts: u32,
}

/// Client TLS settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    /// Verify server certificates against the bundled web PKI roots
    pub verify: bool,
}

/// Gateway client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub url: String,
    pub token: String,
    pub intents: u64,
    pub os: String,
    pub browser: String,
    pub device: String,
    pub invalid_session_delay_ms: u64,
}

/// Echo server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub protocols: Vec<String>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the values are inconsistent.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());
        let defaults = IdentifyProperties::default();

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("mode", "gateway")?
            .set_default("websocket.max_frame_size", 16_i64 * 1024 * 1024)?
            .set_default("websocket.max_message_size", 64_i64 * 1024 * 1024)?
            .set_default("websocket.handshake_timeout_ms", 5000_i64)?
            .set_default("websocket.recv_buffer_size", 65536_i64)?
            .set_default("reconnect.auto_reconnect", true)?
            .set_default("reconnect.initial_delay_seconds", 2.0)?
            .set_default("reconnect.max_delay_seconds", 30.0)?
            .set_default("reconnect.max_attempts", 0_i64)?
            .set_default("tls.verify", true)?
            .set_default("gateway.url", "wss://gateway.discord.gg")?
            .set_default("gateway.token", "")?
            .set_default("gateway.intents", 513_i64)?
            .set_default("gateway.os", defaults.os)?
            .set_default("gateway.browser", defaults.browser)?
            .set_default("gateway.device", defaults.device)?
            .set_default("gateway.invalid_session_delay_ms", 3000_i64)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8765_i64)?
            .set_default("server.protocols", Vec::<String>::new())?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__GATEWAY__INTENTS=513 -> gateway.intents = 513
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.protocols"),
            )
            .set_override_option("gateway.token", std::env::var("GATEWAY_TOKEN").ok())?
            .set_override_option("gateway.url", std::env::var("GATEWAY_URL").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Reject settings that would misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reconnect = &self.reconnect;
        for (key, seconds) in [
            ("initial_delay_seconds", reconnect.initial_delay_seconds),
            ("max_delay_seconds", reconnect.max_delay_seconds),
        ] {
            // Duration::from_secs_f64 panics on these
            if !seconds.is_finite() || Duration::try_from_secs_f64(seconds).is_err() {
                return Err(ConfigError::Message(format!(
                    "reconnect.{key} must be a finite, non-negative number of seconds (got {seconds})"
                )));
            }
        }
        if reconnect.initial_delay_seconds <= 0.0 {
            return Err(ConfigError::Message(
                "reconnect.initial_delay_seconds must be greater than zero".into(),
            ));
        }
        if reconnect.initial_delay_seconds > reconnect.max_delay_seconds {
            return Err(ConfigError::Message(format!(
                "reconnect.initial_delay_seconds ({}) exceeds reconnect.max_delay_seconds ({})",
                reconnect.initial_delay_seconds, reconnect.max_delay_seconds
            )));
        }
        if self.mode == RunMode::Gateway && self.gateway.token.trim().is_empty() {
            return Err(ConfigError::Message(
                "gateway.token is required in gateway mode (set GATEWAY_TOKEN)".into(),
            ));
        }
        if self.server.tls_cert_path.is_some() != self.server.tls_key_path.is_some() {
            return Err(ConfigError::Message(
                "server.tls_cert_path and server.tls_key_path must be set together".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            enabled: self.reconnect.auto_reconnect,
            initial_delay: Duration::from_secs_f64(self.reconnect.initial_delay_seconds),
            max_delay: Duration::from_secs_f64(self.reconnect.max_delay_seconds),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_frame_size: self.websocket.max_frame_size,
            max_message_size: self.websocket.max_message_size,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            reconnect: self.reconnect_config(),
            protocols: Vec::new(),
            limits: self.frame_limits(),
            handshake_timeout: Duration::from_millis(self.websocket.handshake_timeout_ms),
            recv_buffer_size: self.websocket.recv_buffer_size,
            tls_verify: self.tls.verify,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.gateway.url.clone(),
            token: self.gateway.token.clone(),
            intents: self.gateway.intents,
            properties: IdentifyProperties {
                os: self.gateway.os.clone(),
                browser: self.gateway.browser.clone(),
                device: self.gateway.device.clone(),
            },
            invalid_session_delay: Duration::from_millis(self.gateway.invalid_session_delay_ms),
            client: self.client_options(),
        }
    }

    /// Server options, loading the certificate and key when configured.
    pub fn server_options(&self) -> Result<ServerOptions, TransportError> {
        let tls = match (&self.server.tls_cert_path, &self.server.tls_key_path) {
            (Some(cert), Some(key)) => Some(tls::load_server_config(cert, key)?),
            _ => None,
        };
        Ok(ServerOptions {
            host: self.server.host.clone(),
            port: self.server.port,
            tls,
            protocols: self.server.protocols.clone(),
            limits: self.frame_limits(),
            handshake_timeout: Duration::from_millis(self.websocket.handshake_timeout_ms),
            ..ServerOptions::default()
        })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
