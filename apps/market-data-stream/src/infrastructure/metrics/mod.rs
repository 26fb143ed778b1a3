//! Prometheus Metrics Module
//!
//! Exposes stream metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Counts of events received from the feed and applied to the cache
//! - **Subscriptions**: Symbols forwarded upstream, feed errors, subscribed gauge
//! - **Sessions**: Running sessions, connection losses, sink failures
//! - **Latency**: Poll cycle duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! is a no-op until `init_metrics` installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::Category;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
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
    describe_counter!(
        "market_stream_events_received_total",
        "Total events drained from upstream feed sessions"
    );
    describe_counter!(
        "market_stream_events_cached_total",
        "Total events applied to the latest-event cache"
    );
    describe_counter!(
        "market_stream_connection_losses_total",
        "Total feed sessions ended by a lost upstream connection"
    );
    describe_counter!(
        "market_stream_symbols_forwarded_total",
        "Total symbols forwarded to upstream subscribe calls"
    );
    describe_counter!(
        "market_stream_feed_errors_total",
        "Total upstream feed errors by kind"
    );
    describe_counter!(
        "market_stream_sink_failures_total",
        "Total failed persistence sink writes"
    );
    describe_gauge!(
        "market_stream_subscribed_symbols",
        "Number of subscribed symbols per category"
    );
    describe_gauge!(
        "market_stream_sessions_running",
        "Number of feed sessions currently running"
    );
    describe_histogram!(
        "market_stream_poll_cycle_seconds",
        "Time to forward pending symbols and drain events in one cycle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record events drained from a category's session.
pub fn record_events_received(category: Category, count: usize) {
    counter!(
        "market_stream_events_received_total",
        "category" => category.as_str()
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record events applied to the cache.
pub fn record_events_cached(category: Category, count: usize) {
    counter!(
        "market_stream_events_cached_total",
        "category" => category.as_str()
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record a session ended by a lost upstream connection.
pub fn record_connection_lost(category: Category) {
    counter!(
        "market_stream_connection_losses_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record symbols forwarded upstream.
pub fn record_symbols_forwarded(category: Category, count: usize) {
    counter!(
        "market_stream_symbols_forwarded_total",
        "category" => category.as_str()
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record an upstream feed error.
pub fn record_feed_error(category: Category, kind: &'static str) {
    counter!(
        "market_stream_feed_errors_total",
        "category" => category.as_str(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a failed sink write.
pub fn record_sink_failure(category: Category) {
    counter!(
        "market_stream_sink_failures_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Update the subscribed symbol gauge.
pub fn set_subscribed_symbols(category: Category, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64;
    gauge!(
        "market_stream_subscribed_symbols",
        "category" => category.as_str()
    )
    .set(value);
}

/// Update the running session gauge.
pub fn set_sessions_running(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let value = count as f64;
    gauge!("market_stream_sessions_running").set(value);
}

/// Record one poll cycle's duration.
pub fn record_poll_cycle(category: Category, duration: Duration) {
    histogram!(
        "market_stream_poll_cycle_seconds",
        "category" => category.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
