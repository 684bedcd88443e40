//! Prometheus metrics for the peer
//!
//! Exposes metrics at /metrics endpoint for scraping by Prometheus.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;

/// Global Prometheus handle
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Metric names
pub const CONNECTIONS_TOTAL: &str = "ml_peer_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "ml_peer_connections_active";
pub const FRAMES_TOTAL: &str = "ml_peer_frames_total";
pub const SCRIPTS_STARTED: &str = "ml_peer_scripts_started_total";
pub const REQUEST_LATENCY: &str = "ml_peer_request_latency_seconds";

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init_metrics() -> Result<(), BuildError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    if METRICS_HANDLE.set(handle).is_err() {
        return Ok(());
    }

    describe_counter!(CONNECTIONS_TOTAL, "Total number of bridge connections");
    describe_gauge!(CONNECTIONS_ACTIVE, "Number of currently connected bridges");
    describe_counter!(FRAMES_TOTAL, "Frames exchanged, by direction");
    describe_counter!(SCRIPTS_STARTED, "Scripts started, by script and outcome");
    describe_histogram!(REQUEST_LATENCY, "Time spent answering sendInput requests");

    tracing::info!("Metrics system initialized");
    Ok(())
}

/// Handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    METRICS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record a new connection
pub fn record_connection() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed
pub fn record_disconnection() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn record_frame_received() {
    counter!(FRAMES_TOTAL, "direction" => "received").increment(1);
}

pub fn record_frame_sent() {
    counter!(FRAMES_TOTAL, "direction" => "sent").increment(1);
}

/// Label for scripts the registry does not know; keeps client input out of
/// the label set
pub const UNKNOWN_SCRIPT_LABEL: &str = "unknown";

pub fn record_script_start(script: &str, known: bool) {
    let (script, outcome) = script_labels(script, known);
    counter!(SCRIPTS_STARTED, "script" => script, "outcome" => outcome).increment(1);
}

fn script_labels(script: &str, known: bool) -> (String, &'static str) {
    if known {
        (script.to_string(), "started")
    } else {
        (UNKNOWN_SCRIPT_LABEL.to_string(), "unknown")
    }
}

pub fn record_request_latency(duration: Duration) {
    histogram!(REQUEST_LATENCY).record(duration.as_secs_f64());
}
