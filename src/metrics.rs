//! Export metrics
//!
//! Counters and histograms are emitted through the `metrics` facade and are no-ops until
//! [`init_metrics`] installs the Prometheus exporter (`--metrics-addr`).
//!
//! | name | kind | labels |
//! |------|------|--------|
//! | `pocket_requests_total` | counter | `endpoint`, `outcome` |
//! | `pocket_request_duration_seconds` | histogram | `endpoint` |
//! | `pocket_retries_total` | counter | `operation`, `reason` |
//! | `rate_limit_wait_seconds` | histogram | |
//! | `items_exported_total` | counter | `mode` |
//! | `exports_completed_total` | counter | `mode` |
//! | `exports_failed_total` | counter | `mode`, `error` |

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::ExportMode;

static METRICS_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Install the Prometheus exporter and register metric descriptions
///
/// Idempotent; later calls are ignored.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.lock().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "pocket_requests_total",
        Unit::Count,
        "Requests sent to the remote API"
    );
    describe_histogram!(
        "pocket_request_duration_seconds",
        Unit::Seconds,
        "Remote API request duration"
    );
    describe_counter!(
        "pocket_retries_total",
        Unit::Count,
        "Retry attempts after failed requests"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for local quota"
    );
    describe_counter!(
        "items_exported_total",
        Unit::Count,
        "Items written to export files"
    );
    describe_counter!(
        "exports_completed_total",
        Unit::Count,
        "Exports that reached end of data"
    );
    describe_counter!(
        "exports_failed_total",
        Unit::Count,
        "Exports that halted or failed"
    );

    *initialized = true;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Whether the Prometheus exporter is installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.lock().await
}

/// Timing and outcome of one remote request
pub struct RequestMetrics {
    endpoint: &'static str,
    start_time: Instant,
}

impl RequestMetrics {
    /// Start timing a request to `endpoint`
    pub fn start(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            start_time: Instant::now(),
        }
    }

    /// Record a successful response
    pub fn record_success(&self) {
        self.record("ok");
    }

    /// Record a failed request, labelled with a short reason
    pub fn record_failure(&self, reason: &str) {
        self.record(reason);
    }

    fn record(&self, outcome: &str) {
        let duration = self.start_time.elapsed();
        counter!(
            "pocket_requests_total",
            "endpoint" => self.endpoint,
            "outcome" => outcome.to_string(),
        )
        .increment(1);
        histogram!("pocket_request_duration_seconds", "endpoint" => self.endpoint)
            .record(duration.as_secs_f64());

        debug!(
            endpoint = self.endpoint,
            outcome,
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }
}

/// Record a retry of `operation`
pub fn record_retry(operation: &str, reason: &str) {
    counter!(
        "pocket_retries_total",
        "operation" => operation.to_string(),
        "reason" => reason.to_string(),
    )
    .increment(1);
}

/// Record time spent blocked on local quota
pub fn record_rate_limit_wait(wait: Duration) {
    histogram!("rate_limit_wait_seconds").record(wait.as_secs_f64());
}

/// Per-run export metrics
pub struct ExportMetrics {
    mode: ExportMode,
    start_time: Instant,
}

impl ExportMetrics {
    /// Start tracking an export run
    pub fn start(mode: ExportMode) -> Self {
        Self {
            mode,
            start_time: Instant::now(),
        }
    }

    /// Count items written by this run
    pub fn record_items(&self, count: u64) {
        counter!("items_exported_total", "mode" => self.mode.as_str()).increment(count);
    }

    /// Record a run that reached end of data
    pub fn record_success(&self, items: u64) {
        counter!("exports_completed_total", "mode" => self.mode.as_str()).increment(1);
        info!(
            mode = %self.mode,
            items,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Export completed"
        );
    }

    /// Record a run that stopped early
    pub fn record_failure(&self, error: &str) {
        counter!(
            "exports_failed_total",
            "mode" => self.mode.as_str(),
            "error" => error.to_string(),
        )
        .increment(1);
        error!(
            mode = %self.mode,
            error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Export failed"
        );
    }
}
