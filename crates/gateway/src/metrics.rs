//! Metric names and the optional Prometheus recorder.
//!
//! Recording goes through the `metrics` facade, so every call is a no-op
//! until a recorder is installed.

// Metric name constants to avoid typos across modules.

/// Messages routed (counter, labels: outcome).
pub const MESSAGES_ROUTED_TOTAL: &str = "meshrelay_messages_routed_total";
/// Inbound frames that failed to decode (counter).
pub const FRAMES_MALFORMED_TOTAL: &str = "meshrelay_frames_malformed_total";
/// Background persistence failures (counter).
pub const STORE_FAILURES_TOTAL: &str = "meshrelay_store_failures_total";
/// Frames that could not be queued to a live session (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "meshrelay_delivery_failures_total";
/// Sessions replaced by a newer connection for the same identity (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "meshrelay_sessions_evicted_total";
/// Registered sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "meshrelay_sessions_active";

/// Attach help text to every metric. Harmless without a recorder.
pub fn describe() {
    metrics::describe_counter!(MESSAGES_ROUTED_TOTAL, "Messages routed, by outcome");
    metrics::describe_counter!(FRAMES_MALFORMED_TOTAL, "Inbound frames that failed to decode");
    metrics::describe_counter!(STORE_FAILURES_TOTAL, "Failed background message appends");
    metrics::describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        "Frames dropped because a session queue was full or closed"
    );
    metrics::describe_counter!(SESSIONS_EVICTED_TOTAL, "Sessions replaced by a newer connection");
    metrics::describe_gauge!(SESSIONS_ACTIVE, "Currently registered sessions");
}

#[cfg(feature = "prometheus")]
pub use prometheus::install_recorder;

#[cfg(feature = "prometheus")]
mod prometheus {
    use {
        anyhow::Context,
        metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle},
        tracing::info,
    };

    /// Install the global Prometheus recorder. Call once at startup, before
    /// anything is recorded.
    pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install metrics recorder")?;
        super::describe();
        info!("prometheus metrics recorder installed");
        Ok(handle)
    }
}
