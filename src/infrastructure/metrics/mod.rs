//! Prometheus Metrics Module
//!
//! Process-wide counters for the socket engine and the gateway session.
//!
//! # Metrics Collected
//! - Active connections by role
//! - Frames sent and received by opcode
//! - Reconnect attempts and connection failures by stage
//! - Gateway heartbeats by outcome

use once_cell::sync::Lazy;
use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Open connections, labelled "client" or "server"
pub static CONNECTIONS_ACTIVE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("connections_active", "Number of open WebSocket connections").namespace("gateway_socket"),
        &["role"],
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Frames by direction ("in"/"out") and opcode
pub static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("frames_total", "WebSocket frames sent and received").namespace("gateway_socket"),
        &["direction", "opcode"],
    )
    .expect("Failed to create FRAMES_TOTAL metric")
});

/// Reconnect attempts started by the supervisor
pub static RECONNECT_ATTEMPTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("reconnect_attempts_total", "Reconnect attempts").namespace("gateway_socket"),
    )
    .expect("Failed to create RECONNECT_ATTEMPTS_TOTAL metric")
});

/// Failed connection attempts by stage
pub static CONNECTION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("connection_failures_total", "Connection failures by stage").namespace("gateway_socket"),
        &["stage"],
    )
    .expect("Failed to create CONNECTION_FAILURES_TOTAL metric")
});

/// Gateway heartbeats: "sent", "acked", "missed"
pub static GATEWAY_HEARTBEATS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_heartbeats_total", "Gateway heartbeats by outcome").namespace("gateway_socket"),
        &["outcome"],
    )
    .expect("Failed to create GATEWAY_HEARTBEATS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(FRAMES_TOTAL.clone()))
        .expect("Failed to register FRAMES_TOTAL");
    registry
        .register(Box::new(RECONNECT_ATTEMPTS_TOTAL.clone()))
        .expect("Failed to register RECONNECT_ATTEMPTS_TOTAL");
    registry
        .register(Box::new(CONNECTION_FAILURES_TOTAL.clone()))
        .expect("Failed to register CONNECTION_FAILURES_TOTAL");
    registry
        .register(Box::new(GATEWAY_HEARTBEATS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_HEARTBEATS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn connection_opened(role: &str) {
    Lazy::force(&REGISTRY);
    CONNECTIONS_ACTIVE.with_label_values(&[role]).inc();
}

pub fn connection_closed(role: &str) {
    CONNECTIONS_ACTIVE.with_label_values(&[role]).dec();
}

pub fn record_frame(direction: &str, opcode: &str) {
    Lazy::force(&REGISTRY);
    FRAMES_TOTAL.with_label_values(&[direction, opcode]).inc();
}

pub fn record_reconnect_attempt() {
    Lazy::force(&REGISTRY);
    RECONNECT_ATTEMPTS_TOTAL.inc();
}

pub fn record_connection_failure(stage: &str) {
    Lazy::force(&REGISTRY);
    CONNECTION_FAILURES_TOTAL.with_label_values(&[stage]).inc();
}

pub fn record_heartbeat(outcome: &str) {
    Lazy::force(&REGISTRY);
    GATEWAY_HEARTBEATS_TOTAL.with_label_values(&[outcome]).inc();
}
