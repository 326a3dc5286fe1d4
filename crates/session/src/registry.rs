//! Registry of live sessions, one independent context per session

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant};

use gaze::GazeConfig;
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::{SessionError, SessionId};

/// Shared handle to one session; lock it for one frame at a time
pub type SessionHandle = Arc<Mutex<Session>>;

/// Concurrency-safe map from session id to session
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    gaze_config: GazeConfig,
}

impl SessionRegistry {
    /// Create a registry; every session gets its own state built from `gaze_config`
    pub fn new(gaze_config: GazeConfig) -> Result<Self, SessionError> {
        gaze_config.validate()?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            gaze_config,
        })
    }

    /// Start a new session and return its id
    pub fn start(&self) -> Result<SessionId, SessionError> {
        let id = SessionId::new();
        let session = Session::new(id, self.gaze_config.clone())?;

        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| SessionError::Lock(e.to_string()))?;
        sessions.insert(id, Arc::new(Mutex::new(session)));
        info!("Registered session {} ({} live)", id, sessions.len());
        Ok(id)
    }

    /// Look up a session
    pub fn get(&self, id: &SessionId) -> Result<SessionHandle, SessionError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| SessionError::Lock(e.to_string()))?;
        sessions.get(id).cloned().ok_or(SessionError::NotFound(*id))
    }

    /// Remove a session, returning its handle
    pub fn remove(&self, id: &SessionId) -> Result<SessionHandle, SessionError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| SessionError::Lock(e.to_string()))?;
        let handle = sessions.remove(id).ok_or(SessionError::NotFound(*id))?;
        debug!("Removed session {} ({} live)", id, sessions.len());
        Ok(handle)
    }

    /// Remove sessions with no stream attached and no activity for `idle`.
    ///
    /// Sessions locked by a frame in flight are skipped. The caller finalizes
    /// the returned sessions.
    pub fn sweep_idle(&self, idle: Duration, now: Instant) -> Result<Vec<SessionHandle>, SessionError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| SessionError::Lock(e.to_string()))?;

        let mut expired = Vec::new();
        for (id, handle) in sessions.iter() {
            let session = match handle.try_lock() {
                Ok(session) => session,
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(e)) => return Err(SessionError::Lock(e.to_string())),
            };
            if !session.is_streaming() && now.saturating_duration_since(session.last_activity()) >= idle {
                expired.push(*id);
            }
        }

        let removed: Vec<_> = expired.iter().filter_map(|id| sessions.remove(id)).collect();
        if !removed.is_empty() {
            warn!(
                "Evicted {} sessions idle for {:?} ({} live)",
                removed.len(),
                idle,
                sessions.len()
            );
        }
        Ok(removed)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn gaze_config(&self) -> &GazeConfig {
        &self.gaze_config
    }
}
