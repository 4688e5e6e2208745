use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Storage
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grading_store_operations_total",
        "Total number of storage operations issued by the grading core",
        &["operation", "store", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "grading_store_operation_duration_seconds",
        "Storage operation duration in seconds",
        &["operation", "store"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Grading
    pub static ref GRADINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gradings_total",
        "Submissions that reached a grading outcome",
        &["mode", "skill", "outcome"]
    )
    .unwrap();

    pub static ref SUBMISSION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submission_transitions_total",
        "Committed submission status transitions",
        &["from", "to"]
    )
    .unwrap();

    pub static ref DISPATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grading_dispatches_total",
        "Subjective submissions handed to the grading queue",
        &["skill", "status"]
    )
    .unwrap();

    pub static ref QUEUE_PUBLISH_DURATION_SECONDS: Histogram = register_histogram!(
        "grading_queue_publish_duration_seconds",
        "Time spent pushing a task onto the grading queue",
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5]
    )
    .unwrap();

    // Progress & review
    pub static ref PROGRESS_RECORDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progress_records_total",
        "Scores folded into per-skill progress",
        &["skill", "outcome"]
    )
    .unwrap();

    pub static ref PROGRESS_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progress_deliveries_total",
        "Attempts to deliver a committed grade to progress",
        &["source", "outcome"]
    )
    .unwrap();

    pub static ref PROGRESS_SWEEP_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progress_sweep_ticks_total",
        "Background passes over submissions with undelivered progress",
        &["status"]
    )
    .unwrap();

    pub static ref REVIEW_ACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "review_actions_total",
        "Reviewer claim, release and verdict actions",
        &["action", "outcome"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Times a storage call and counts its outcome.
pub async fn track_store_operation<F, T, E>(operation: &str, store: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, store, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, store])
        .observe(duration);

    result
}

pub fn record_transition(from: &str, to: &str) {
    SUBMISSION_TRANSITIONS_TOTAL
        .with_label_values(&[from, to])
        .inc();
}
