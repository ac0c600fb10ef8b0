//! Prometheus metrics for migration runs.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric names.  A run has no HTTP surface, so the
//! exposition text is written to a file at the end of the run instead of
//! being served.

use anyhow::Context;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

// -- Metric name constants ----------------------------------------------------

/// Finished tasks (counter). Labels: result = done | skipped | failed.
pub const OBJECTS_TOTAL: &str = "objmigrate_objects_total";

/// Failed tasks by error category (counter). Labels: stage, kind.
pub const FAILURES_TOTAL: &str = "objmigrate_failures_total";

/// Bytes uploaded to the destination (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "objmigrate_bytes_uploaded_total";

/// Source download duration in seconds (histogram).
pub const DOWNLOAD_DURATION_SECONDS: &str = "objmigrate_download_duration_seconds";

/// Destination upload duration in seconds (histogram).
pub const UPLOAD_DURATION_SECONDS: &str = "objmigrate_upload_duration_seconds";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Serializes recorder installation; only one global recorder may exist.
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Install the global Prometheus recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests).
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions. Call once after `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(OBJECTS_TOTAL, "Finished migration tasks by result");
    describe_counter!(FAILURES_TOTAL, "Failed migration tasks by stage and kind");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Bytes uploaded to the destination");
    describe_histogram!(DOWNLOAD_DURATION_SECONDS, "Source download duration in seconds");
    describe_histogram!(UPLOAD_DURATION_SECONDS, "Destination upload duration in seconds");
}

/// Prometheus exposition text, or `None` if no recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

/// Write the current exposition text to `path`.
pub fn write_snapshot(path: &Path) -> anyhow::Result<()> {
    let body = render().context("Prometheus recorder not initialized")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, body)
        .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    Ok(())
}

// -- Tests --------------------------------------------------------------------
