//! Metrics collection and exposition.
//!
//! # Metrics
//! - `meter_exchanges_total` (counter): metered exchanges by workload
//! - `meter_received_bytes_total` (counter): inbound wire bytes by workload
//! - `meter_sent_bytes_total` (counter): outbound wire bytes by workload
//! - `meter_reports_total` (counter): report outcomes (delivered, failed,
//!   timed_out, saturated, no_runtime)
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade; without an installed recorder
//!   they are no-ops
//! - Exposition is a Prometheus scrape endpoint, opt-in via config

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record the final counters of one exchange.
pub fn record_exchange(workload_id: &str, sent: u64, received: u64) {
    let workload = workload_id.to_owned();
    ::metrics::counter!("meter_exchanges_total", "workload" => workload.clone()).increment(1);
    ::metrics::counter!("meter_received_bytes_total", "workload" => workload.clone())
        .increment(received);
    ::metrics::counter!("meter_sent_bytes_total", "workload" => workload).increment(sent);
}

/// Record what happened to a consumption report.
pub fn record_report(outcome: &'static str) {
    ::metrics::counter!("meter_reports_total", "outcome" => outcome).increment(1);
}
