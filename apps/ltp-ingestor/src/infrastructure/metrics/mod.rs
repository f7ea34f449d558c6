//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Deliveries by payload format, decode failures, bad topics
//! - **Writes**: Flushes, rows written, requeued and dropped, flush latency
//! - **Topics**: Topic cache hits and misses
//! - **Subscriptions**: Leg outcomes, active topics, broker reconnects
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Message counters
    describe_counter!(
        "ltp_ingestor_messages_received_total",
        "Total decoded broker messages by payload format"
    );
    describe_counter!(
        "ltp_ingestor_decode_failures_total",
        "Total payloads no format could decode"
    );
    describe_counter!(
        "ltp_ingestor_unroutable_messages_total",
        "Total messages on unrecognized topics"
    );
    describe_counter!(
        "ltp_ingestor_observations_enqueued_total",
        "Total observations handed to the batch writer"
    );

    // Write path
    describe_counter!("ltp_ingestor_flushes_total", "Total batch flushes by outcome");
    describe_counter!("ltp_ingestor_rows_written_total", "Total tick rows committed");
    describe_counter!(
        "ltp_ingestor_rows_requeued_total",
        "Total tick rows requeued after a failed flush"
    );
    describe_counter!(
        "ltp_ingestor_rows_dropped_total",
        "Total tick rows lost after exhausting flush attempts"
    );
    describe_histogram!(
        "ltp_ingestor_flush_duration_seconds",
        "Time to resolve topics and commit one batch"
    );

    // Topic cache
    describe_counter!(
        "ltp_ingestor_topic_cache_total",
        "Topic id lookups by cache result"
    );

    // Subscriptions
    describe_counter!("ltp_ingestor_option_legs_total", "Option legs by outcome");
    describe_gauge!(
        "ltp_ingestor_active_subscriptions",
        "Active broker subscriptions by origin"
    );
    describe_counter!(
        "ltp_ingestor_broker_reconnects_total",
        "Total broker reconnection attempts"
    );
    describe_counter!(
        "ltp_ingestor_broker_errors_total",
        "Total broker connection errors"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a decoded message.
pub fn record_message_received(format: &'static str) {
    counter!("ltp_ingestor_messages_received_total", "format" => format).increment(1);
}

/// Record a payload that failed to decode.
pub fn record_decode_failure() {
    counter!("ltp_ingestor_decode_failures_total").increment(1);
}

/// Record a message on an unrecognized topic.
pub fn record_unroutable() {
    counter!("ltp_ingestor_unroutable_messages_total").increment(1);
}

/// Record an observation accepted by the writer.
pub fn record_observation_enqueued() {
    counter!("ltp_ingestor_observations_enqueued_total").increment(1);
}

/// Record a flush outcome.
pub fn record_flush(committed: bool) {
    let outcome = if committed { "committed" } else { "failed" };
    counter!("ltp_ingestor_flushes_total", "outcome" => outcome).increment(1);
}

/// Record committed rows.
pub fn record_rows_written(rows: u64) {
    counter!("ltp_ingestor_rows_written_total").increment(rows);
}

/// Record rows requeued after a failed flush.
pub fn record_rows_requeued(rows: u64) {
    counter!("ltp_ingestor_rows_requeued_total").increment(rows);
}

/// Record rows lost after exhausting their attempts.
pub fn record_rows_dropped(rows: u64) {
    counter!("ltp_ingestor_rows_dropped_total").increment(rows);
}

/// Record flush duration.
pub fn record_flush_duration(duration: Duration) {
    histogram!("ltp_ingestor_flush_duration_seconds").record(duration.as_secs_f64());
}

/// Record a topic cache lookup.
pub fn record_topic_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("ltp_ingestor_topic_cache_total", "result" => result).increment(1);
}

/// Record option leg outcomes.
pub fn record_legs(outcome: &'static str, count: usize) {
    counter!("ltp_ingestor_option_legs_total", "outcome" => outcome).increment(count as u64);
}

/// Update active subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(index_topics: usize, option_topics: usize) {
    gauge!("ltp_ingestor_active_subscriptions", "origin" => "index").set(index_topics as f64);
    gauge!("ltp_ingestor_active_subscriptions", "origin" => "option").set(option_topics as f64);
}

/// Record a broker reconnection attempt.
pub fn record_reconnect() {
    counter!("ltp_ingestor_broker_reconnects_total").increment(1);
}

/// Record a broker connection error.
pub fn record_broker_error(error_type: &str) {
    counter!(
        "ltp_ingestor_broker_errors_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received("single");
        record_flush(true);
        record_flush(false);
        record_topic_cache(true);
        record_legs("subscribed", 6);
        set_active_subscriptions(1, 6);
        record_flush_duration(Duration::from_millis(3));
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();

        record_rows_written(3);
        assert!(first.render().contains("ltp_ingestor_rows_written_total"));
        assert!(second.render().contains("ltp_ingestor_rows_written_total"));
        assert!(get_metrics_handle().is_some());
    }
}
