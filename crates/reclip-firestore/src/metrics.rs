//! Project store request metrics.
//!
//! Every call the worker makes against a project document is counted by
//! operation and outcome, so a deleted project (`not_found`) can be told
//! apart from a flaky backend (`server_error`).

use metrics::{counter, histogram};

pub mod names {
    pub const PROJECT_STORE_REQUESTS_TOTAL: &str = "reclip_project_store_requests_total";
    pub const PROJECT_STORE_REQUEST_SECONDS: &str = "reclip_project_store_request_duration_seconds";
    pub const PROJECT_STORE_RETRIES_TOTAL: &str = "reclip_project_store_retries_total";
}

/// Outcome label for an HTTP status.
pub fn outcome_label(status: u16) -> &'static str {
    match status {
        200..=299 => "ok",
        404 => "not_found",
        409 | 412 => "precondition_failed",
        429 => "throttled",
        400..=499 => "client_error",
        _ => "server_error",
    }
}

/// Record one finished project store request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::PROJECT_STORE_REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "outcome" => outcome_label(status)
    )
    .increment(1);

    histogram!(
        names::PROJECT_STORE_REQUEST_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a transport-level retry of a project store request.
pub fn record_retry(operation: &str) {
    counter!(names::PROJECT_STORE_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_label_separates_missing_projects() {
        assert_eq!(outcome_label(200), "ok");
        assert_eq!(outcome_label(404), "not_found");
        assert_eq!(outcome_label(412), "precondition_failed");
        assert_eq!(outcome_label(429), "throttled");
        assert_eq!(outcome_label(403), "client_error");
        assert_eq!(outcome_label(503), "server_error");
    }
}
