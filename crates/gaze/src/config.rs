//! Gaze tracking configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::GazeError;

/// Gaze tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Iris position (fraction of eye width) below which the eye looks away
    pub iris_low_ratio: f32,

    /// Iris position (fraction of eye width) above which the eye looks away
    pub iris_high_ratio: f32,

    /// Continuous look-away time before frames are flagged (milliseconds)
    pub away_threshold_ms: u64,

    /// Maximum evidence images per uninterrupted away streak
    pub evidence_cap: u32,

    /// Also log frames where the subject looks at the center
    pub record_center_frames: bool,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            iris_low_ratio: 0.3,
            iris_high_ratio: 0.7,
            away_threshold_ms: 3000,
            evidence_cap: 5,
            record_center_frames: false,
        }
    }
}

impl GazeConfig {
    /// Look-away threshold as a duration
    pub fn away_threshold(&self) -> Duration {
        Duration::from_millis(self.away_threshold_ms)
    }

    /// Reject ratio bands that cannot classify anything as centered
    pub fn validate(&self) -> Result<(), GazeError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.iris_low_ratio) || !in_unit(self.iris_high_ratio) {
            return Err(GazeError::Config(format!(
                "iris ratios must lie in [0, 1], got {} and {}",
                self.iris_low_ratio, self.iris_high_ratio
            )));
        }
        if self.iris_low_ratio >= self.iris_high_ratio {
            return Err(GazeError::Config(format!(
                "iris_low_ratio ({}) must be below iris_high_ratio ({})",
                self.iris_low_ratio, self.iris_high_ratio
            )));
        }
        Ok(())
    }
}
