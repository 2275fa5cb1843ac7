// ABOUTME: Prometheus metrics for relay traffic, webhook requests, sessions and errors
// ABOUTME: Thin wrappers over the metrics macros so call sites stay one line

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const WEBHOOK_REQUESTS: &str = "bridge_webhook_requests_total";
pub const MESSAGES_RELAYED: &str = "bridge_messages_relayed_total";
pub const EVENTS_SKIPPED: &str = "bridge_events_skipped_total";
pub const ERRORS: &str = "bridge_errors_total";
pub const IRC_SESSIONS: &str = "bridge_irc_sessions";
pub const ROOM_JOINS: &str = "bridge_room_joins_total";

/// Install the global Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

pub fn record_webhook_request(status: &'static str) {
    counter!(WEBHOOK_REQUESTS, "status" => status).increment(1);
}

/// `direction` is `"to_irc"` or `"to_matrix"`.
pub fn record_message_relayed(direction: &'static str) {
    counter!(MESSAGES_RELAYED, "direction" => direction).increment(1);
}

pub fn record_event_skipped(reason: &'static str) {
    counter!(EVENTS_SKIPPED, "reason" => reason).increment(1);
}

pub fn record_error(kind: &'static str) {
    counter!(ERRORS, "kind" => kind).increment(1);
}

pub fn record_room_join() {
    counter!(ROOM_JOINS).increment(1);
}

pub fn set_irc_sessions(count: u64) {
    gauge!(IRC_SESSIONS).set(count as f64);
}
