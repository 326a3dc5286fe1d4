//! Evidence capture for flagged frames

use chrono::{DateTime, Utc};
use frame_capture::EncodedFrame;
use gaze::FlagTracker;
use storage::EvidenceStore;
use tracing::{debug, warn};

use crate::SessionId;

/// What happened to the evidence for a flagged frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Image stored, with its reference
    Stored(String),
    /// Write failed; still counted against the streak's cap
    Failed(String),
    /// Streak already has its full quota of evidence
    CapReached,
    /// Frame arrived without an image
    NoImage,
}

impl CaptureOutcome {
    pub fn stored_reference(&self) -> Option<&str> {
        match self {
            CaptureOutcome::Stored(reference) => Some(reference),
            _ => None,
        }
    }
}

/// Evidence file name: `{session_id}_{epoch_ms}.jpg`
pub fn evidence_file_name(session_id: &SessionId, at: DateTime<Utc>) -> String {
    format!("{}_{}.jpg", session_id, at.timestamp_millis())
}

/// Persist `image` for a flagged frame unless the streak's cap is reached.
///
/// Only called while the tracker is flagged. Never fails: write errors are
/// logged and reported in the outcome.
pub fn maybe_capture(
    session_id: &SessionId,
    tracker: &mut FlagTracker,
    image: Option<&EncodedFrame>,
    at: DateTime<Utc>,
    store: &dyn EvidenceStore,
) -> CaptureOutcome {
    if !tracker.can_capture() {
        debug!("Evidence suppressed for session {}: cap reached", session_id);
        return CaptureOutcome::CapReached;
    }
    let Some(image) = image else {
        return CaptureOutcome::NoImage;
    };

    tracker.record_capture();
    let file_name = evidence_file_name(session_id, at);

    let result = image
        .to_jpeg()
        .map_err(|e| e.to_string())
        .and_then(|jpeg| store.save_image(&file_name, &jpeg).map_err(|e| e.to_string()));

    match result {
        Ok(reference) => {
            debug!(
                "Captured evidence {} ({}/streak)",
                reference,
                tracker.streak().evidence_captured
            );
            CaptureOutcome::Stored(reference)
        }
        Err(e) => {
            warn!("Failed to store evidence {} for session {}: {}", file_name, session_id, e);
            CaptureOutcome::Failed(e)
        }
    }
}
