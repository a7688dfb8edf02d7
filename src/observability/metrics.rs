//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, method, status, outcome
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by route
//! - `gateway_upstream_requests_total` (counter): upstream attempts by authority, outcome
//! - `gateway_pool_connections` (gauge): pooled connections by state
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::upstream::PoolStats;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One routed request. `route` is empty when nothing matched.
pub fn record_request(route: &str, method: &str, status: u16, outcome: &str, elapsed: Duration) {
    ::metrics::counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    ::metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_upstream(authority: &str, outcome: &str) {
    ::metrics::counter!(
        "gateway_upstream_requests_total",
        "authority" => authority.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_pool(stats: &PoolStats) {
    ::metrics::gauge!("gateway_pool_connections", "state" => "active").set(stats.active as f64);
    ::metrics::gauge!("gateway_pool_connections", "state" => "inactive").set(stats.inactive as f64);
    ::metrics::gauge!("gateway_pool_connections", "state" => "pending").set(stats.pending as f64);
}
