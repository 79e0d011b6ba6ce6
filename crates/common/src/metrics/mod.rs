//! Metrics and observability utilities
//!
//! Prometheus metrics for the crawl pipeline with standardized naming.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all citecrawl metrics
pub const METRICS_PREFIX: &str = "citecrawl";

/// Buckets for outbound fetch latency (in seconds), including backoff waits
pub const FETCH_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    300.0,  // 5m, retry ladder exhausted
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Work item metrics
    describe_counter!(
        format!("{}_items_received_total", METRICS_PREFIX),
        Unit::Count,
        "Work items delivered to the pool"
    );

    describe_counter!(
        format!("{}_items_finished_total", METRICS_PREFIX),
        Unit::Count,
        "Work items finished, labelled by outcome"
    );

    // Fetch metrics
    describe_counter!(
        format!("{}_fetch_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Outbound bibliographic API requests"
    );

    describe_counter!(
        format!("{}_fetch_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Fetch retries, labelled by reason"
    );

    describe_histogram!(
        format!("{}_fetch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Fetch latency including retries"
    );

    describe_gauge!(
        format!("{}_fetches_in_flight", METRICS_PREFIX),
        Unit::Count,
        "Fetches currently holding an admission slot"
    );

    // Persistence metrics
    describe_counter!(
        format!("{}_papers_created_total", METRICS_PREFIX),
        Unit::Count,
        "Paper rows inserted for the first time"
    );

    // Queue metrics
    describe_counter!(
        format!("{}_publishes_total", METRICS_PREFIX),
        Unit::Count,
        "Work item publishes, labelled by status"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time a single fetch
pub struct FetchTimer {
    start: Instant,
}

impl FetchTimer {
    /// Start tracking a fetch and count it as in flight
    pub fn start() -> Self {
        gauge!(format!("{}_fetches_in_flight", METRICS_PREFIX)).increment(1.0);
        Self { start: Instant::now() }
    }

    /// Record fetch completion
    pub fn finish(self, outcome: &'static str) {
        histogram!(
            format!("{}_fetch_duration_seconds", METRICS_PREFIX),
            "outcome" => outcome
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

impl Drop for FetchTimer {
    fn drop(&mut self) {
        gauge!(format!("{}_fetches_in_flight", METRICS_PREFIX)).decrement(1.0);
    }
}

pub fn record_item_received() {
    counter!(format!("{}_items_received_total", METRICS_PREFIX)).increment(1);
}

pub fn record_item_finished(outcome: &'static str) {
    counter!(
        format!("{}_items_finished_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_fetch_attempt() {
    counter!(format!("{}_fetch_attempts_total", METRICS_PREFIX)).increment(1);
}

pub fn record_fetch_retry(reason: &'static str) {
    counter!(
        format!("{}_fetch_retries_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_paper_created() {
    counter!(format!("{}_papers_created_total", METRICS_PREFIX)).increment(1);
}

pub fn record_publish(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_publishes_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in FETCH_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_fetch_timer() {
        let timer = FetchTimer::start();
        timer.finish("found");
        // No recorder installed: just verify it runs without panic
    }
}
