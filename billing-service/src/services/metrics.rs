//! Metrics module for billing-service.
//! Provides Prometheus metrics for billing operations and the HTTP surface.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// HTTP request counter
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Invoices generated counter
pub static INVOICES_GENERATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment operations counter
pub static PAYMENT_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Plan changes counter
pub static PLAN_CHANGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Router sync failures counter
pub static ROUTER_SYNC_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_http_requests_total", "Total HTTP requests"),
            &["method", "status"]
        )
        .expect("Failed to register HTTP_REQUESTS_TOTAL")
    });

    HTTP_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "billing_http_request_duration_seconds",
                "HTTP request duration",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["method"]
        )
        .expect("Failed to register HTTP_REQUEST_DURATION")
    });

    INVOICES_GENERATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_invoices_generated_total",
                "Total invoices generated by source"
            ),
            &["source"]
        )
        .expect("Failed to register INVOICES_GENERATED_TOTAL")
    });

    PAYMENT_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_payment_operations_total",
                "Total payment operations by method and outcome"
            ),
            &["method", "outcome"]
        )
        .expect("Failed to register PAYMENT_OPERATIONS_TOTAL")
    });

    PLAN_CHANGES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_plan_changes_total", "Total plan changes by outcome"),
            &["outcome"]
        )
        .expect("Failed to register PLAN_CHANGES_TOTAL")
    });

    ROUTER_SYNC_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_router_sync_failures_total",
                "Router provisioning failures by operation"
            ),
            &["operation"]
        )
        .expect("Failed to register ROUTER_SYNC_FAILURES_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, status: &str) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, status]).inc();
    }
}

/// Record HTTP request duration.
pub fn record_http_request_duration(method: &str, duration_secs: f64) {
    if let Some(histogram) = HTTP_REQUEST_DURATION.get() {
        histogram.with_label_values(&[method]).observe(duration_secs);
    }
}

/// Record an invoice generated.
pub fn record_invoice_generated(source: &str) {
    if let Some(counter) = INVOICES_GENERATED_TOTAL.get() {
        counter.with_label_values(&[source]).inc();
    }
}

/// Record a payment operation.
pub fn record_payment_operation(method: &str, outcome: &str) {
    if let Some(counter) = PAYMENT_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[method, outcome]).inc();
    }
}

/// Record a plan change.
pub fn record_plan_change(outcome: &str) {
    if let Some(counter) = PLAN_CHANGES_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a router sync failure.
pub fn record_router_sync_failure(operation: &str) {
    if let Some(counter) = ROUTER_SYNC_FAILURES_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
