//! Metrics export for the ridechat server.
//!
//! Instrumentation lives in `ridechat_core::metrics`; this module describes
//! the metrics, installs the Prometheus exporter and tracks connections.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use ridechat_core::metrics::names;
use std::net::SocketAddr;
use tracing::info;

/// Describe every metric the server emits.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one connection");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Live deliveries dropped because an outbox was full or closed"
    );
    metrics::describe_counter!(
        names::PERSIST_FAILURES,
        "Relational writes that failed"
    );
    metrics::describe_counter!(
        names::PERSIST_DROPPED,
        "Relational writes skipped because the queue was full"
    );
    metrics::describe_gauge!(
        names::PERSIST_QUEUE_DEPTH,
        "Messages waiting for a relational write"
    );
    metrics::describe_histogram!(
        names::INGEST_SECONDS,
        "Time to validate, append and publish one message"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
