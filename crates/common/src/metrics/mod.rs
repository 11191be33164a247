//! Metrics and observability utilities
//!
//! Counters and histograms for the pipeline stages, with standardized
//! naming under a single prefix.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all collector metrics
pub const METRICS_PREFIX: &str = "collector";

/// Buckets for external call latency (in seconds)
pub const EXTERNAL_LATENCY_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // External calls
    describe_counter!(
        format!("{}_external_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total outbound API requests"
    );

    describe_histogram!(
        format!("{}_external_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Outbound API request latency in seconds"
    );

    // Ingestion
    describe_counter!(
        format!("{}_identifiers_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total identifiers created by ingestion"
    );

    describe_counter!(
        format!("{}_invalid_identifiers_total", METRICS_PREFIX),
        Unit::Count,
        "Total identifiers rejected by the validator"
    );

    // Enrichment
    describe_counter!(
        format!("{}_urls_added_total", METRICS_PREFIX),
        Unit::Count,
        "Total URLs stored, by stage"
    );

    describe_counter!(
        format!("{}_identifiers_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total identifiers handled by an enrichment stage"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Enrichment stage run time in seconds"
    );

    // Engagement
    describe_counter!(
        format!("{}_engagement_records_total", METRICS_PREFIX),
        Unit::Count,
        "Total engagement snapshots stored"
    );

    tracing::info!("Metrics registered");
}

/// Record one outbound call
pub fn record_external_request(service: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_external_requests_total", METRICS_PREFIX),
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_external_request_duration_seconds", METRICS_PREFIX),
        "service" => service.to_string()
    )
    .record(duration_secs);
}

/// Record URLs stored by one stage
pub fn record_urls_added(stage: &str, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        format!("{}_urls_added_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(count);
}

/// Record the outcome of one ingestion call
pub fn record_ingestion(identifiers_added: u64, invalid: u64) {
    counter!(format!("{}_identifiers_ingested_total", METRICS_PREFIX)).increment(identifiers_added);
    counter!(format!("{}_invalid_identifiers_total", METRICS_PREFIX)).increment(invalid);
}

/// Record stored engagement snapshots
pub fn record_engagement(count: u64) {
    counter!(format!("{}_engagement_records_total", METRICS_PREFIX)).increment(count);
}

/// Helper to time one stage run
pub struct StageMetrics {
    start: Instant,
    stage: String,
}

impl StageMetrics {
    /// Start timing a stage
    pub fn start(stage: &str) -> Self {
        Self {
            start: Instant::now(),
            stage: stage.to_string(),
        }
    }

    /// Record stage completion
    pub fn finish(self, processed: u64) {
        counter!(
            format!("{}_identifiers_processed_total", METRICS_PREFIX),
            "stage" => self.stage.clone()
        )
        .increment(processed);

        histogram!(
            format!("{}_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in EXTERNAL_LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_stage_metrics() {
        let metrics = StageMetrics::start("doi_new");
        record_urls_added("doi_new", 3);
        record_external_request("doi.org", "success", 0.1);
        metrics.finish(3);
        // Just verify it runs without a recorder installed
    }
}
