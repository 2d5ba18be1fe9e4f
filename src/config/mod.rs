//! # Configuration
//!
//! [`Settings`] picks the run mode and feeds the socket, reconnect, TLS and
//! gateway options. Later sources override earlier ones:
//! 1. Built-in defaults
//! 2. `config/default.toml`, then `config/{RUN_ENV}.toml`
//! 3. `APP__SECTION__KEY` variables (a `.env` file is read via dotenvy)
//! 4. `GATEWAY_TOKEN` and `GATEWAY_URL`
//!
//! ```rust,ignore
//! use gateway_socket::config::Settings;
//!
//! let settings = Settings::load()?;
//! let (client, events) = GatewayClient::connect(settings.gateway_config())?;
//! ```

mod settings;

pub use settings::*;
