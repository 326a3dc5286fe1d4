//! Gaze Monitoring
//!
//! Per-frame gaze direction and sustained look-away detection:
//! - Iris-vs-eye-corner classification (left, right, center, no face)
//! - Continuous away-time tracking with a flagging threshold
//! - Per-streak evidence budget

pub mod classifier;
pub mod config;
pub mod landmarks;
pub mod state;

pub use classifier::{EyeReading, GazeClassifier};
pub use config::GazeConfig;
pub use landmarks::{EyeLandmarks, LandmarkFrame, LandmarkProvider, Point, UnavailableProvider};
pub use state::{AwayStreak, FlagState, FlagStatus, FlagTracker};

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gaze error types
#[derive(Error, Debug)]
pub enum GazeError {
    #[error("No landmark detector configured")]
    DetectorUnavailable,

    #[error("Landmark detection failed: {0}")]
    Detection(String),

    #[error("Invalid landmarks: {0}")]
    InvalidLandmarks(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Discrete gaze direction for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GazeLabel {
    #[serde(rename = "Looking Center")]
    Center,
    #[serde(rename = "Looking Left")]
    Left,
    #[serde(rename = "Looking Right")]
    Right,
    #[serde(rename = "No Face Detected")]
    NoFace,
}

impl GazeLabel {
    pub fn is_center(&self) -> bool {
        matches!(self, GazeLabel::Center)
    }

    /// Wire and log representation
    pub fn as_str(&self) -> &'static str {
        match self {
            GazeLabel::Center => "Looking Center",
            GazeLabel::Left => "Looking Left",
            GazeLabel::Right => "Looking Right",
            GazeLabel::NoFace => "No Face Detected",
        }
    }
}

impl fmt::Display for GazeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label and flag status for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GazeObservation {
    pub label: GazeLabel,
    pub status: FlagStatus,
}

/// Gaze monitoring for one session: classifier plus flag state
#[derive(Debug, Clone)]
pub struct GazeMonitor {
    config: GazeConfig,
    classifier: GazeClassifier,
    tracker: FlagTracker,
}

impl GazeMonitor {
    /// Create a new monitor, rejecting invalid configuration
    pub fn new(config: GazeConfig) -> Result<Self, GazeError> {
        config.validate()?;
        Ok(Self {
            classifier: GazeClassifier::new(&config),
            tracker: FlagTracker::new(&config),
            config,
        })
    }

    /// Classify a frame without touching the flag state
    pub fn classify(&self, landmarks: Option<&LandmarkFrame>) -> GazeLabel {
        self.classifier.classify(landmarks)
    }

    /// Classify a frame and advance the flag state
    pub fn observe(&mut self, landmarks: Option<&LandmarkFrame>, now: Instant) -> GazeObservation {
        let label = self.classify(landmarks);
        self.observe_label(label, now)
    }

    /// Advance the flag state with an already classified label
    pub fn observe_label(&mut self, label: GazeLabel, now: Instant) -> GazeObservation {
        let status = self.tracker.update(label, now);
        GazeObservation { label, status }
    }

    pub fn tracker(&self) -> &FlagTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut FlagTracker {
        &mut self.tracker
    }

    pub fn config(&self) -> &GazeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_label_serializes_as_wire_string() {
        assert_eq!(serde_json::to_string(&GazeLabel::Left).unwrap(), "\"Looking Left\"");
        let parsed: GazeLabel = serde_json::from_str("\"No Face Detected\"").unwrap();
        assert_eq!(parsed, GazeLabel::NoFace);
        assert_eq!(GazeLabel::Right.to_string(), "Looking Right");
    }

    #[test]
    fn test_monitor_rejects_invalid_config() {
        let config = GazeConfig {
            iris_low_ratio: 0.9,
            ..Default::default()
        };
        assert!(GazeMonitor::new(config).is_err());
    }

    #[test]
    fn test_monitor_no_face_flags_after_threshold() {
        let mut monitor = GazeMonitor::new(GazeConfig::default()).unwrap();
        let t0 = Instant::now();

        let first = monitor.observe(None, t0);
        assert_eq!(first.label, GazeLabel::NoFace);
        assert_eq!(first.status, FlagStatus::Away(GazeLabel::NoFace));

        let later = monitor.observe(None, t0 + Duration::from_secs(3));
        assert_eq!(later.status, FlagStatus::Flagged);

        let back = monitor.observe(None, t0 + Duration::from_secs(4));
        assert!(back.status.is_flagged());
        assert_eq!(monitor.tracker().streak().started_at, Some(t0));
    }
}
