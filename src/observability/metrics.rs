//! Metrics collection and exposition.
//!
//! # Metrics
//! - `skein_requests_total` (counter): responses by method and status
//! - `skein_stash_sockets` (gauge): stashed sockets by kind
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus exporter is optional and listens on its own address

use std::net::SocketAddr;

use axum::http::{Method, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Count one response.
pub fn record_request(method: &Method, status: StatusCode) {
    metrics::counter!(
        "skein_requests_total",
        "method" => method.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

/// Publish the current number of stashed sockets of `kind`.
pub fn record_stash_size(kind: &'static str, sockets: usize) {
    metrics::gauge!("skein_stash_sockets", "kind" => kind).set(sockets as f64);
}

/// Install the Prometheus exporter with an HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn install_exporter(address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|err| err.to_string())?;
    tracing::info!(address = %address, "metrics exporter listening");
    Ok(())
}
