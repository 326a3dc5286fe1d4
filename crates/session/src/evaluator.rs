//! Session finalization and malpractice evaluation

use serde::{Deserialize, Serialize};
use storage::SessionLogStore;
use tracing::{info, warn};

use crate::event::GazeEvent;
use crate::session::Session;
use crate::{SessionError, SessionId};

/// Evaluation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Flagged frames above which a session counts as malpractice
    pub malpractice_threshold: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            malpractice_threshold: 100,
        }
    }
}

/// Session-level judgment, recomputed from the durable log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionVerdict {
    pub session_id: SessionId,
    pub flagged_count: u64,
    pub is_malpractice: bool,
    /// Events in the durable log
    pub total_events: u64,
    /// Threshold the verdict was computed against
    pub threshold: u64,
}

/// Writes session logs and judges them
#[derive(Debug, Clone, Default)]
pub struct SessionEvaluator {
    config: EvaluationConfig,
}

impl SessionEvaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Deactivate the session and write its full event log.
    ///
    /// Calling this again overwrites the log with the current in-memory events.
    pub fn finalize(
        &self,
        session: &mut Session,
        store: &dyn SessionLogStore,
    ) -> Result<String, SessionError> {
        session.deactivate();
        let contents = serde_json::to_vec_pretty(session.events())
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        let location = store.write_log(&session.id().to_string(), &contents)?;

        info!(
            "Session {} finalized: {} events written to {}",
            session.id(),
            session.events().len(),
            location
        );
        Ok(location)
    }

    /// Judge a session from its durable log
    pub fn evaluate(
        &self,
        session_id: &SessionId,
        store: &dyn SessionLogStore,
    ) -> Result<SessionVerdict, SessionError> {
        let contents = store.read_log(&session_id.to_string())?;
        let events: Vec<GazeEvent> = serde_json::from_slice(&contents)
            .map_err(|e| SessionError::CorruptLog(e.to_string()))?;

        if let Some(foreign) = events.iter().find(|e| e.session_id != *session_id) {
            return Err(SessionError::CorruptLog(format!(
                "log for {} contains an event of session {}",
                session_id, foreign.session_id
            )));
        }

        let flagged_count = events.iter().filter(|e| e.direction.is_flagged()).count() as u64;
        let is_malpractice = flagged_count > self.config.malpractice_threshold;
        if is_malpractice {
            warn!(
                "Session {} engaged in malpractice: {} flagged frames (threshold {})",
                session_id, flagged_count, self.config.malpractice_threshold
            );
        }

        Ok(SessionVerdict {
            session_id: *session_id,
            flagged_count,
            is_malpractice,
            total_events: events.len() as u64,
            threshold: self.config.malpractice_threshold,
        })
    }

    /// Finalize then evaluate, as done when a session ends
    pub fn end(
        &self,
        session: &mut Session,
        store: &dyn SessionLogStore,
    ) -> Result<SessionVerdict, SessionError> {
        self.finalize(session, store)?;
        self.evaluate(&session.id(), store)
    }
}
