//! Proctoring Sessions
//!
//! Ties gaze monitoring to a per-session event trace:
//! - Per-frame processing with bounded evidence capture
//! - Append-only event log, finalized to durable storage
//! - Malpractice verdicts recomputed from the durable log
//! - A registry keeping every live session independent

pub mod evaluator;
pub mod event;
pub mod evidence;
pub mod registry;
pub mod session;

pub use evaluator::{EvaluationConfig, SessionEvaluator, SessionVerdict};
pub use event::{Direction, GazeEvent};
pub use evidence::{evidence_file_name, CaptureOutcome};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{FrameStatus, FrameTime, Session};

use std::fmt;
use std::str::FromStr;

use gaze::GazeError;
use serde::{Deserialize, Serialize};
use storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Session {0} is no longer active")]
    Inactive(SessionId),

    #[error("Session {0} already has an active stream")]
    Busy(SessionId),

    #[error("Session log storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Session log serialization failed: {0}")]
    Serialization(String),

    #[error("Session log is corrupt: {0}")]
    CorruptLog(String),

    #[error("Gaze configuration rejected: {0}")]
    Gaze(#[from] GazeError),

    #[error("Lock error: {0}")]
    Lock(String),
}

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
