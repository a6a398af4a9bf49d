//! Metrics and observability utilities
//!
//! Prometheus metrics for the filling pipeline with standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all docfill metrics
pub const METRICS_PREFIX: &str = "docfill";

/// Buckets for generation latency (model calls are slow)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 1m
    120.0, // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Task metrics
    describe_counter!(
        format!("{}_tasks_started_total", METRICS_PREFIX),
        Unit::Count,
        "Total filling tasks started"
    );

    describe_counter!(
        format!("{}_tasks_finished_total", METRICS_PREFIX),
        Unit::Count,
        "Total filling tasks finished, by terminal status"
    );

    describe_counter!(
        format!("{}_files_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Template files processed, by outcome"
    );

    describe_counter!(
        format!("{}_placeholders_resolved_total", METRICS_PREFIX),
        Unit::Count,
        "Placeholders replaced with generated content"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrieval_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Collection queries that failed and were treated as empty"
    );

    describe_histogram!(
        format!("{}_fused_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of chunks in a fused ranking"
    );

    // Generation metrics
    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Generation call latency in seconds"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_sources_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total source documents ingested"
    );

    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_task_started() {
    counter!(format!("{}_tasks_started_total", METRICS_PREFIX)).increment(1);
}

pub fn record_task_finished(status: &str) {
    counter!(
        format!("{}_tasks_finished_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_file(status: &str) {
    counter!(
        format!("{}_files_processed_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_placeholder(context: &str) {
    counter!(
        format!("{}_placeholders_resolved_total", METRICS_PREFIX),
        "context" => context.to_string()
    )
    .increment(1);
}

pub fn record_retrieval_failure(mode: &str) {
    counter!(
        format!("{}_retrieval_failures_total", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .increment(1);
}

pub fn record_fusion(result_count: usize) {
    histogram!(format!("{}_fused_results_count", METRICS_PREFIX)).record(result_count as f64);
}

/// Helper to record generation metrics
pub fn record_generation(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .record(duration_secs);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(chunks_created: usize) {
    counter!(format!("{}_sources_ingested_total", METRICS_PREFIX)).increment(1);

    counter!(format!("{}_chunks_created_total", METRICS_PREFIX)).increment(chunks_created as u64);
}
