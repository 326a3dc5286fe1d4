//! Facial landmarks consumed by the classifier, and the detector seam

use frame_capture::VideoFrame;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GazeError;

/// MediaPipe face-mesh indices (with `refine_landmarks` enabled).
///
/// "Left" and "right" are the subject's, so the right eye appears on the
/// image's left side of a non-mirrored webcam frame.
pub mod mesh {
    pub const RIGHT_EYE_OUTER: usize = 33;
    pub const RIGHT_EYE_INNER: usize = 133;
    pub const LEFT_EYE_INNER: usize = 362;
    pub const LEFT_EYE_OUTER: usize = 263;

    /// Iris center followed by its four contour points
    pub const RIGHT_IRIS: [usize; 5] = [468, 469, 470, 471, 472];
    pub const LEFT_IRIS: [usize; 5] = [473, 474, 475, 476, 477];

    /// Base mesh without iris refinement
    pub const BASE_POINTS: usize = 468;
    /// Mesh including both iris clusters
    pub const REFINED_POINTS: usize = 478;
}

/// 2-D point in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Corners and iris cluster of a single eye
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeLandmarks {
    pub outer_corner: Point,
    pub inner_corner: Point,
    /// Iris center and/or contour points; may be empty without iris refinement
    #[serde(default)]
    pub iris: Vec<Point>,
}

impl EyeLandmarks {
    /// Mean x of the iris cluster
    pub fn iris_x(&self) -> Option<f32> {
        if self.iris.is_empty() {
            return None;
        }
        let sum: f32 = self.iris.iter().map(|p| p.x).sum();
        Some(sum / self.iris.len() as f32)
    }
}

/// Landmarks of the single detected face in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Subject's left eye
    #[serde(default)]
    pub left_eye: Option<EyeLandmarks>,
    /// Subject's right eye
    #[serde(default)]
    pub right_eye: Option<EyeLandmarks>,
}

impl LandmarkFrame {
    /// Build from a normalized face mesh (coordinates in 0..1)
    pub fn from_face_mesh(points: &[[f32; 2]], width: u32, height: u32) -> Result<Self, GazeError> {
        if points.len() < mesh::BASE_POINTS {
            return Err(GazeError::InvalidLandmarks(format!(
                "face mesh has {} points, expected at least {}",
                points.len(),
                mesh::BASE_POINTS
            )));
        }
        if width == 0 || height == 0 {
            return Err(GazeError::InvalidLandmarks(format!(
                "face mesh frame size {}x{} is empty",
                width, height
            )));
        }
        if let Some(idx) = points.iter().position(|p| !p[0].is_finite() || !p[1].is_finite()) {
            return Err(GazeError::InvalidLandmarks(format!(
                "face mesh point {} is not finite",
                idx
            )));
        }
        if points.len() < mesh::REFINED_POINTS {
            debug!("Face mesh without iris refinement; gaze cannot be classified");
        }

        let to_pixel = |idx: usize| -> Point {
            let [x, y] = points[idx];
            Point::new(x * width as f32, y * height as f32)
        };
        let eye = |outer: usize, inner: usize, iris: &[usize]| EyeLandmarks {
            outer_corner: to_pixel(outer),
            inner_corner: to_pixel(inner),
            iris: iris
                .iter()
                .filter(|&&idx| idx < points.len())
                .map(|&idx| to_pixel(idx))
                .collect(),
        };

        Ok(Self {
            width,
            height,
            left_eye: Some(eye(mesh::LEFT_EYE_OUTER, mesh::LEFT_EYE_INNER, &mesh::LEFT_IRIS)),
            right_eye: Some(eye(mesh::RIGHT_EYE_OUTER, mesh::RIGHT_EYE_INNER, &mesh::RIGHT_IRIS)),
        })
    }

    /// Reject frames with an empty frame size or non-finite coordinates
    pub fn validate(&self) -> Result<(), GazeError> {
        if self.width == 0 || self.height == 0 {
            return Err(GazeError::InvalidLandmarks(format!(
                "landmark frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        let finite = |p: &Point| p.x.is_finite() && p.y.is_finite();
        let bad = self.eyes().any(|eye| {
            !finite(&eye.outer_corner) || !finite(&eye.inner_corner) || !eye.iris.iter().all(finite)
        });
        if bad {
            return Err(GazeError::InvalidLandmarks(
                "eye landmarks contain non-finite coordinates".to_string(),
            ));
        }
        Ok(())
    }

    /// Iterate over the eyes that were detected
    pub fn eyes(&self) -> impl Iterator<Item = &EyeLandmarks> {
        self.left_eye.iter().chain(self.right_eye.iter())
    }
}

/// Facial landmark detector.
///
/// Implementations need not be thread-safe: every connection owns its own
/// provider and calls it from a single task.
pub trait LandmarkProvider: Send {
    /// Detect the face in `frame`; `Ok(None)` means no face was found
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<LandmarkFrame>, GazeError>;

    /// Human readable name for logs
    fn name(&self) -> &str;
}

/// Provider used when no server-side detector is configured.
///
/// Every call fails, so clients must send landmarks with each frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProvider;

impl LandmarkProvider for UnavailableProvider {
    fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<LandmarkFrame>, GazeError> {
        Err(GazeError::DetectorUnavailable)
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
