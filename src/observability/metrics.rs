//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_upstream_connects_total` (counter): upstream attempts by stream
//! - `relay_upstream_failures_total` (counter): failed attempts by stream, kind
//! - `relay_retry_exhausted_total` (counter): retry cycles that gave up
//! - `relay_viewers_evicted_total` (counter): slow viewers disconnected
//! - `relay_bytes_forwarded_total` (counter): bytes written to viewers
//! - `relay_viewers` (gauge): attached plus waiting viewers
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_upstream_connect(stream: &str) {
    counter!("relay_upstream_connects_total", "stream" => stream.to_string()).increment(1);
}

pub fn record_upstream_failure(stream: &str, kind: &'static str) {
    counter!("relay_upstream_failures_total", "stream" => stream.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_retry_exhausted(stream: &str) {
    counter!("relay_retry_exhausted_total", "stream" => stream.to_string()).increment(1);
}

pub fn record_viewer_evicted(stream: &str) {
    counter!("relay_viewers_evicted_total", "stream" => stream.to_string()).increment(1);
}

pub fn record_bytes_forwarded(stream: &str, bytes: usize) {
    if bytes > 0 {
        counter!("relay_bytes_forwarded_total", "stream" => stream.to_string())
            .increment(bytes as u64);
    }
}

pub fn set_viewers(stream: &str, viewers: usize) {
    gauge!("relay_viewers", "stream" => stream.to_string()).set(viewers as f64);
}
