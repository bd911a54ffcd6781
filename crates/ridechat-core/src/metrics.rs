//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; the server installs the
//! Prometheus exporter. Without an installed recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ridechat_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ridechat_connections_active";
    pub const ROOMS_ACTIVE: &str = "ridechat_rooms_active";
    pub const MESSAGES_TOTAL: &str = "ridechat_messages_total";
    pub const MESSAGES_BYTES: &str = "ridechat_messages_bytes";
    pub const DELIVERIES_DROPPED: &str = "ridechat_deliveries_dropped_total";
    pub const PERSIST_FAILURES: &str = "ridechat_persist_failures_total";
    pub const PERSIST_DROPPED: &str = "ridechat_persist_dropped_total";
    pub const PERSIST_QUEUE_DEPTH: &str = "ridechat_persist_queue_depth";
    pub const INGEST_SECONDS: &str = "ridechat_ingest_seconds";
    pub const ERRORS_TOTAL: &str = "ridechat_errors_total";
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record ingest latency.
pub fn record_ingest_latency(seconds: f64) {
    histogram!(names::INGEST_SECONDS).record(seconds);
}

/// Record a delivery that could not be queued for a connection.
pub fn record_delivery_dropped(reason: &'static str) {
    counter!(names::DELIVERIES_DROPPED, "reason" => reason).increment(1);
}

/// Record a failed relational write.
pub fn record_persist_failure() {
    counter!(names::PERSIST_FAILURES).increment(1);
}

/// Record a relational write skipped because the queue was full.
pub fn record_persist_dropped() {
    counter!(names::PERSIST_DROPPED).increment(1);
}

/// Update the write-behind queue depth.
pub fn set_persist_queue_depth(depth: usize) {
    gauge!(names::PERSIST_QUEUE_DEPTH).set(depth as f64);
}

/// Update the active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
