//! Per-frame gaze direction from iris position relative to the eye corners

use crate::landmarks::{EyeLandmarks, LandmarkFrame};
use crate::{GazeConfig, GazeLabel};

/// Classification of a single eye
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeReading {
    /// Iris position across the eye, 0 at the image-left corner, 1 at the image-right corner
    pub ratio: f32,
    pub label: GazeLabel,
}

/// Stateless gaze classifier
#[derive(Debug, Clone)]
pub struct GazeClassifier {
    low_ratio: f32,
    high_ratio: f32,
}

impl GazeClassifier {
    pub fn new(config: &GazeConfig) -> Self {
        Self {
            low_ratio: config.iris_low_ratio,
            high_ratio: config.iris_high_ratio,
        }
    }

    /// Classify one frame; `None` means no face was detected
    pub fn classify(&self, landmarks: Option<&LandmarkFrame>) -> GazeLabel {
        let Some(face) = landmarks else {
            return GazeLabel::NoFace;
        };

        let left = face.left_eye.as_ref().and_then(|eye| self.read_eye(eye));
        let right = face.right_eye.as_ref().and_then(|eye| self.read_eye(eye));

        match (left, right) {
            // A face with no usable eye is as good as no face
            (None, None) => GazeLabel::NoFace,
            (Some(only), None) | (None, Some(only)) => only.label,
            (Some(a), Some(b)) if a.label == b.label => a.label,
            (Some(a), Some(b)) => match (a.label.is_center(), b.label.is_center()) {
                (true, false) => b.label,
                (false, true) => a.label,
                // Left vs Right: the stronger deviation wins
                _ => {
                    if (a.ratio - 0.5).abs() >= (b.ratio - 0.5).abs() {
                        a.label
                    } else {
                        b.label
                    }
                }
            },
        }
    }

    /// Classify a single eye, `None` when it cannot be measured
    pub fn read_eye(&self, eye: &EyeLandmarks) -> Option<EyeReading> {
        let corner_min_x = eye.outer_corner.x.min(eye.inner_corner.x);
        let corner_max_x = eye.outer_corner.x.max(eye.inner_corner.x);
        let eye_width = corner_max_x - corner_min_x;
        if eye_width <= f32::EPSILON {
            return None;
        }

        let ratio = (eye.iris_x()? - corner_min_x) / eye_width;
        if !ratio.is_finite() {
            return None;
        }

        // An iris near the image-left corner means the subject looks to their right
        let label = if ratio < self.low_ratio {
            GazeLabel::Right
        } else if ratio > self.high_ratio {
            GazeLabel::Left
        } else {
            GazeLabel::Center
        };

        Some(EyeReading { ratio, label })
    }
}

impl Default for GazeClassifier {
    fn default() -> Self {
        Self::new(&GazeConfig::default())
    }
}
