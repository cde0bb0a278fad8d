//! Prometheus metrics for sqlgen-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

/// Counter for API requests by endpoint and outcome.
pub static REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sqlgen_requests_total",
        "Total number of SQL generation API requests",
        &["endpoint", "status"]
    )
    .expect("Failed to register REQUESTS")
});

/// Histogram for time spent waiting on the generation provider.
pub static GENERATION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "sqlgen_generation_duration_seconds",
        "SQL generation duration in seconds",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
    )
    .expect("Failed to register GENERATION_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sqlgen_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0, 30.0]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for executed statements by operation and outcome.
pub static STATEMENTS_EXECUTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sqlgen_statements_executed_total",
        "Total number of executed SQL statements",
        &["operation", "status"]
    )
    .expect("Failed to register STATEMENTS_EXECUTED")
});

/// Counter for statements rejected by the security validator.
pub static VALIDATION_REJECTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sqlgen_validation_rejections_total",
        "Total number of statements rejected by security validation",
        &["reason"]
    )
    .expect("Failed to register VALIDATION_REJECTIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "sqlgen_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&REQUESTS);
    Lazy::force(&GENERATION_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&STATEMENTS_EXECUTED);
    Lazy::force(&VALIDATION_REJECTIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_request(endpoint: &str, status: &str) {
    REQUESTS.with_label_values(&[endpoint, status]).inc();
}

pub fn record_generation_duration(duration_secs: f64) {
    GENERATION_DURATION.observe(duration_secs);
}

pub fn record_db_query_duration(operation: &str, duration_secs: f64) {
    DB_QUERY_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_statement_executed(operation: &str, status: &str) {
    STATEMENTS_EXECUTED
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_validation_rejection(reason: &str) {
    VALIDATION_REJECTIONS.with_label_values(&[reason]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
