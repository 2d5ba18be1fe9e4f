//! Gateway Client
//!
//! Session-aware client for `{op, d, s, t}` gateways.

pub mod client;

pub use client::{gateway_url, GatewayClient, GatewayConfig, GatewayEvent};
