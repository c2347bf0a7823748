//! Prometheus metrics for hnas-probe
//!
//! Counts remote commands, polling attempts and log watches so long test
//! runs against a backend can be observed from outside.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: Remote commands by kind (shell/ssc) and status
    pub const REMOTE_COMMANDS_TOTAL: &str = "hnas_remote_commands_total";
    /// Counter: Extra probe attempts made while polling
    pub const RETRY_ATTEMPTS_TOTAL: &str = "hnas_retry_attempts_total";
    /// Counter: Polling results by probe and outcome
    pub const RETRY_OUTCOMES_TOTAL: &str = "hnas_retry_outcomes_total";
    /// Counter: Log watches by result (found/timeout/error)
    pub const LOG_WATCHES_TOTAL: &str = "hnas_log_watches_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record a remote command and whether it succeeded
pub fn record_command(kind: &str, status: &str) {
    counter!(names::REMOTE_COMMANDS_TOTAL, "kind" => kind.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record one more attempt of a polled probe
pub fn record_retry_attempt(probe: &str) {
    counter!(names::RETRY_ATTEMPTS_TOTAL, "probe" => probe.to_string()).increment(1);
}

/// Record how polling a probe ended
pub fn record_retry_outcome(probe: &str, outcome: &str) {
    counter!(names::RETRY_OUTCOMES_TOTAL, "probe" => probe.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record the result of a log watch
pub fn record_log_watch(result: &str) {
    counter!(names::LOG_WATCHES_TOTAL, "result" => result.to_string()).increment(1);
}
