//! Bridge metrics
//!
//! Recorded through the `metrics` facade; the host process decides whether a
//! recorder (e.g. Prometheus) is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::Once;
use std::time::Duration;

/// Metric names
pub const REQUESTS_TOTAL: &str = "ml_bridge_requests_total";
pub const REPLIES_TOTAL: &str = "ml_bridge_replies_total";
pub const REPLIES_DROPPED: &str = "ml_bridge_replies_dropped_total";
pub const REPLY_LATENCY: &str = "ml_bridge_reply_latency_seconds";
pub const CONNECTIONS_TOTAL: &str = "ml_bridge_connections_total";
pub const RECONNECT_ATTEMPTS: &str = "ml_bridge_reconnect_attempts_total";

static DESCRIBE: Once = Once::new();

/// Describe bridge metrics once per process
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(REQUESTS_TOTAL, "Requests sent to the remote peer");
        describe_counter!(REPLIES_TOTAL, "Replies delivered to a continuation");
        describe_counter!(REPLIES_DROPPED, "Replies or requests dropped without delivery");
        describe_histogram!(REPLY_LATENCY, "Time from request to reply in seconds");
        describe_counter!(CONNECTIONS_TOTAL, "Established peer sessions");
        describe_counter!(RECONNECT_ATTEMPTS, "Reconnection attempts");
    });
}

pub(crate) fn record_request() {
    counter!(REQUESTS_TOTAL).increment(1);
}

pub(crate) fn record_reply(latency: Duration) {
    counter!(REPLIES_TOTAL).increment(1);
    histogram!(REPLY_LATENCY).record(latency.as_secs_f64());
}

/// `reason`: empty_reply, unexpected_shape, timeout, connection_lost, not_connected
pub(crate) fn record_dropped(reason: &'static str) {
    counter!(REPLIES_DROPPED, "reason" => reason).increment(1);
}

pub(crate) fn record_connection() {
    counter!(CONNECTIONS_TOTAL).increment(1);
}

pub(crate) fn record_reconnect_attempt() {
    counter!(RECONNECT_ATTEMPTS).increment(1);
}
