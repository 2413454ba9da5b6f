//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (request counts, latency, denials, redirects)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `cors_proxy_requests_total` (counter): total requests by method, status
//! - `cors_proxy_request_duration_seconds` (histogram): latency distribution
//! - `cors_proxy_denied_total` (counter): policy denials by reason
//! - `cors_proxy_redirects_followed` (histogram): redirect hops per request
//! - `cors_proxy_upstream_failures_total` (counter): transport failures by kind
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations inside the recorder)
//! - Low-cardinality labels only: method, status, denial reason, failure kind

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_counter!(
        "cors_proxy_requests_total",
        "Total requests handled, by method and response status"
    );
    describe_histogram!(
        "cors_proxy_request_duration_seconds",
        "Wall-clock time from request receipt to response completion"
    );
    describe_counter!(
        "cors_proxy_denied_total",
        "Requests refused by the access policy, by reason"
    );
    describe_histogram!(
        "cors_proxy_redirects_followed",
        "Redirect hops followed per proxied request"
    );
    describe_counter!(
        "cors_proxy_upstream_failures_total",
        "Outbound transport failures, by kind"
    );

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "cors_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!("cors_proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a policy denial.
pub fn record_denied(reason: &'static str) {
    counter!("cors_proxy_denied_total", "reason" => reason).increment(1);
}

/// Record how many redirects a finished chase followed.
pub fn record_redirects(hops: usize) {
    histogram!("cors_proxy_redirects_followed").record(hops as f64);
}

/// Record an outbound transport failure.
pub fn record_upstream_failure(kind: &'static str) {
    counter!("cors_proxy_upstream_failures_total", "kind" => kind).increment(1);
}
