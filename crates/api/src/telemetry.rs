//! Logging setup and Prometheus counters

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use session::{CaptureOutcome, FrameStatus, SessionVerdict};
use tracing::Level;

use crate::config::{LogFormat, ServerConfig};
use crate::ApiError;

/// Initialize the global tracing subscriber
pub fn init_logging(config: &ServerConfig) -> Result<(), ApiError> {
    let level: Level = config
        .log_level
        .parse()
        .map_err(|_| ApiError::Logging(format!("unknown log level '{}'", config.log_level)))?;

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true);
    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| ApiError::Logging(e.to_string()))
}

/// Install the Prometheus recorder; its handle renders `/metrics`
pub fn install_prometheus() -> Result<PrometheusHandle, ApiError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::Metrics(e.to_string()))
}

pub fn record_frame(status: &FrameStatus) {
    counter!("gaze_frames_total", "direction" => status.direction.as_str()).increment(1);
    if status.direction.is_flagged() {
        counter!("gaze_flagged_frames_total").increment(1);
    }
    if let Some(CaptureOutcome::Failed(_)) = status.capture {
        counter!("gaze_evidence_failures_total").increment(1);
    }
}

pub fn record_frame_error() {
    counter!("gaze_frame_errors_total").increment(1);
}

pub fn record_session_started() {
    counter!("gaze_sessions_started_total").increment(1);
}

pub fn record_session_ended(verdict: &SessionVerdict) {
    let outcome = if verdict.is_malpractice { "malpractice" } else { "clean" };
    counter!("gaze_sessions_ended_total", "outcome" => outcome).increment(1);
}

pub fn record_sessions_evicted(count: usize) {
    counter!("gaze_sessions_evicted_total").increment(count as u64);
}
