//! Metrics collection and Prometheus export.

use crate::models::{FileType, SessionStatus, Verdict};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process. Later calls are no-ops.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    });
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

pub fn record_session(status: SessionStatus, elapsed: Duration) {
    metrics::counter!("verification_sessions_total", "status" => status.as_str()).increment(1);
    metrics::histogram!("verification_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_verdict(modality: &'static str, verdict: Verdict) {
    metrics::counter!(
        "modality_verdicts_total",
        "modality" => modality,
        "verdict" => verdict.as_str()
    )
    .increment(1);
}

pub fn record_dedup_hit(file_type: FileType) {
    metrics::counter!("dedup_hits_total", "file_type" => file_type.as_str()).increment(1);
}
