//! Prometheus metrics for fontpack.
//!
//! The recorder is installed once per process and rendered on demand by the
//! server's `/metrics` route; there is no separate exporter listener.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `fontpack_requests_total` | Counter | `outcome` | Bundle requests answered |
//! | `fontpack_request_duration_seconds` | Histogram | `outcome` | Time to the response |
//! | `fontpack_in_flight_requests` | Gauge | - | Bundle requests being processed |
//! | `fontpack_assets_fetched_total` | Counter | - | Assets appended to archives |
//! | `fontpack_archive_bytes` | Histogram | - | Size of sealed archives |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Bundle requests answered, by outcome.
pub const REQUESTS_TOTAL: &str = "fontpack_requests_total";

/// Time from request arrival to response, by outcome.
pub const REQUEST_DURATION_SECONDS: &str = "fontpack_request_duration_seconds";

/// Bundle requests currently being processed.
pub const IN_FLIGHT_REQUESTS: &str = "fontpack_in_flight_requests";

/// Assets appended to archives.
pub const ASSETS_FETCHED_TOTAL: &str = "fontpack_assets_fetched_total";

/// Size of sealed archives in bytes.
pub const ARCHIVE_BYTES: &str = "fontpack_archive_bytes";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Bundling is dominated by upstream round trips.
            duration_buckets: vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are rejected or
/// another recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    if !config.duration_buckets.is_empty() {
        builder = builder
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
                &config.duration_buckets,
            )
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    let handle = builder
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of bundle requests answered");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Bundle request duration in seconds"
    );
    describe_gauge!(
        IN_FLIGHT_REQUESTS,
        "Number of bundle requests currently being processed"
    );
    describe_counter!(ASSETS_FETCHED_TOTAL, "Total number of font assets fetched");
    describe_histogram!(ARCHIVE_BYTES, "Size of produced archives in bytes");
}

/// Records an answered bundle request.
///
/// `outcome` is `"success"` or `"error"`.
pub fn record_request(outcome: &str, duration: Duration) {
    counter!(REQUESTS_TOTAL, "outcome" => outcome.to_string()).increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Guard that tracks one in-flight bundle request.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight gauge until the guard is dropped.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}
