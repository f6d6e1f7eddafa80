//! Metrics and observability utilities
//!
//! Prometheus metrics with a shared `deckforge_` prefix. Pipeline stages are
//! slow (seconds to minutes), so stage histograms use their own buckets.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DeckForge metrics
pub const METRICS_PREFIX: &str = "deckforge";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    5.000,  // 5s
    30.00,  // 30s
    120.0,  // 2m, full pipeline runs
];

/// Buckets for pipeline stage duration
pub const STAGE_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.250,  // 250ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    180.0,  // 3m, extractor timeout
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

    // Pipeline metrics
    describe_counter!(
        format!("{}_submissions_total", METRICS_PREFIX),
        Unit::Count,
        "Deck submissions by outcome"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline stage failures by stage"
    );

    describe_counter!(
        format!("{}_llm_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "LLM completion attempts by outcome"
    );

    describe_counter!(
        format!("{}_emails_total", METRICS_PREFIX),
        Unit::Count,
        "Completion emails by outcome"
    );

    describe_counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        Unit::Count,
        "Submissions rejected by the per-user rate limit"
    );

    describe_counter!(
        format!("{}_files_unavailable_total", METRICS_PREFIX),
        Unit::Count,
        "Download attempts that found the stored report missing"
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

/// Helper to record one pipeline stage
pub fn record_stage(stage: &str, duration_secs: f64, success: bool) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);

    if !success {
        counter!(
            format!("{}_stage_failures_total", METRICS_PREFIX),
            "stage" => stage.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a finished submission ("completed", "failed", "rejected")
pub fn record_submission(outcome: &str) {
    counter!(
        format!("{}_submissions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record one LLM attempt
pub fn record_llm_attempt(model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_attempts_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Helper to record an email dispatch outcome
pub fn record_email(sent: bool) {
    let status = if sent { "sent" } else { "failed" };

    counter!(
        format!("{}_emails_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_rate_limited() {
    counter!(format!("{}_rate_limited_total", METRICS_PREFIX)).increment(1);
}

pub fn record_file_unavailable() {
    counter!(format!("{}_files_unavailable_total", METRICS_PREFIX)).increment(1);
}
