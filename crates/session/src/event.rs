//! Session event records

use chrono::{DateTime, Utc};
use gaze::GazeLabel;
use serde::{Deserialize, Serialize};

use crate::SessionId;

/// Direction recorded for a frame: a gaze label or the flagged marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "Looking Center")]
    Center,
    #[serde(rename = "Looking Left")]
    Left,
    #[serde(rename = "Looking Right")]
    Right,
    #[serde(rename = "No Face Detected")]
    NoFace,
    #[serde(rename = "Flagged", alias = "Flagged: Looking away for 3+ seconds")]
    Flagged,
}

impl Direction {
    pub fn is_flagged(&self) -> bool {
        matches!(self, Direction::Flagged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Flagged => "Flagged",
            Direction::Center => GazeLabel::Center.as_str(),
            Direction::Left => GazeLabel::Left.as_str(),
            Direction::Right => GazeLabel::Right.as_str(),
            Direction::NoFace => GazeLabel::NoFace.as_str(),
        }
    }
}

impl From<GazeLabel> for Direction {
    fn from(label: GazeLabel) -> Self {
        match label {
            GazeLabel::Center => Direction::Center,
            GazeLabel::Left => Direction::Left,
            GazeLabel::Right => Direction::Right,
            GazeLabel::NoFace => Direction::NoFace,
        }
    }
}

/// One entry of a session's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_image: Option<String>,
}
