//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder.
/// Returns a handle that renders the `/metrics` body.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "reclip_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reclip_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "reclip_http_requests_in_flight";

    // Job metrics
    pub const JOBS_ENQUEUED_TOTAL: &str = "reclip_jobs_enqueued_total";
    pub const WORKER_TRIGGERS_TOTAL: &str = "reclip_worker_triggers_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "reclip_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_enqueued() {
    counter!(names::JOBS_ENQUEUED_TOTAL).increment(1);
}

/// Record one trigger invocation by outcome (`idle`, `completed`, ...).
pub fn record_worker_trigger(outcome: &'static str) {
    counter!(names::WORKER_TRIGGERS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Metrics middleware for HTTP requests.
///
/// Labels use the route template (`/api/jobs/:job_id`) so ids do not blow
/// up label cardinality.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
