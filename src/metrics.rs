/// Metrics and telemetry
///
/// Prometheus-compatible counters for request traffic, authentication
/// failures, quota rejections, and upstream advisory calls.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// Error responses by error code
    pub static ref API_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "api_errors_total",
        "Total number of error responses",
        &["code"]
    )
    .unwrap();

    /// Quota rejections by usage category
    pub static ref QUOTA_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quota_rejections_total",
        "Requests rejected for exceeding the monthly quota",
        &["category"]
    )
    .unwrap();

    /// Upstream advisory call latencies by service
    pub static ref UPSTREAM_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "upstream_request_duration_seconds",
        "Upstream advisory service latencies in seconds",
        &["service"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();
}

/// Record an error response; quota rejections get their own counter too
pub fn record_error(code: &str) {
    API_ERRORS_TOTAL.with_label_values(&[code]).inc();
}

pub fn record_quota_rejection(category: &str) {
    QUOTA_REJECTIONS_TOTAL.with_label_values(&[category]).inc();
}

/// Render all registered metrics in Prometheus text exposition format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
