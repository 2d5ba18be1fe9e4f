//! # Gateway Socket
//!
//! Command-line entry point. Depending on `mode` this runs either a gateway
//! client that logs every session event, or an echo WebSocket server.

use anyhow::Result;
use tracing::info;

use gateway_socket::config::Settings;
use gateway_socket::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    gateway_socket::telemetry::init_tracing();

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        mode = ?settings.mode,
        environment = %settings.environment,
        gateway_url = %settings.gateway.url,
        server_addr = %settings.server_addr(),
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;
    if let Some(addr) = application.local_addr() {
        info!(%addr, "Echo server ready");
    }
    application.run_until_stopped().await?;

    Ok(())
}
