//! Session lifecycle routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use session::{SessionError, SessionId, SessionVerdict};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{telemetry, ApiError, AppState};

/// Response for session start
#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: SessionId,
}

/// Start a proctoring session
pub async fn start_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let session_id = state.registry.start()?;
    telemetry::record_session_started();
    Ok((StatusCode::CREATED, Json(StartResponse { session_id })))
}

/// End a session: finalize its log, then judge it from that log.
///
/// The session leaves the registry only once its log is durable, so a
/// failed write can be retried.
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionVerdict>, ApiError> {
    let handle = state.registry.get(&session_id)?;
    let worker = Arc::clone(&state);

    let verdict = tokio::task::spawn_blocking(move || {
        let mut session = handle
            .lock()
            .map_err(|e| SessionError::Lock(e.to_string()))?;
        worker.evaluator.end(&mut session, worker.logs.as_ref())
    })
    .await
    .map_err(|e| ApiError::Task(e.to_string()))??;

    // An idle sweep may have evicted the session while its log was written
    match state.registry.remove(&session_id) {
        Ok(_) | Err(SessionError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    telemetry::record_session_ended(&verdict);
    info!(
        "Session {} ended: {} flagged frames, malpractice={}",
        session_id, verdict.flagged_count, verdict.is_malpractice
    );
    Ok(Json(verdict))
}

/// Judge a finished session from its durable log
pub async fn get_verdict(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionVerdict>, ApiError> {
    let worker = Arc::clone(&state);
    let verdict = tokio::task::spawn_blocking(move || {
        worker.evaluator.evaluate(&session_id, worker.logs.as_ref())
    })
    .await
    .map_err(|e| ApiError::Task(e.to_string()))??;
    Ok(Json(verdict))
}

/// Finalize and drop sessions idle for longer than `idle`, returning how many
/// were evicted. Runs on the blocking pool.
pub fn reap_idle_sessions(state: &AppState, idle: Duration, now: Instant) -> usize {
    let evicted = match state.registry.sweep_idle(idle, now) {
        Ok(evicted) => evicted,
        Err(e) => {
            warn!("Idle session sweep failed: {}", e);
            return 0;
        }
    };

    for handle in &evicted {
        let mut session = match handle.lock() {
            Ok(session) => session,
            Err(e) => {
                warn!("Evicted session lock poisoned: {}", e);
                continue;
            }
        };
        match state.evaluator.finalize(&mut session, state.logs.as_ref()) {
            Ok(location) => info!("Idle session {} finalized to {}", session.id(), location),
            Err(e) => warn!("Failed to finalize idle session {}: {}", session.id(), e),
        }
    }
    evicted.len()
}
