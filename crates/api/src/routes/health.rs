//! Liveness, health and metrics routes

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gaze::{LandmarkProvider, UnavailableProvider};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: SystemMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub storage: ComponentHealth,
    pub detector: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub backend: String,
}

/// System metrics
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub active_sessions: usize,
}

/// Root liveness message
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
}

pub async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Server is up and running",
        status: "healthy",
    })
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    // Sessions can still be streamed without a server-side detector
    let detector_status = if state.detector_name == UnavailableProvider.name() {
        "client_landmarks_only"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            storage: ComponentHealth {
                status: "ok".to_string(),
                backend: state.storage_backend.clone(),
            },
            detector: ComponentHealth {
                status: detector_status.to_string(),
                backend: state.detector_name.clone(),
            },
        },
        metrics: SystemMetrics {
            active_sessions: state.registry.len(),
        },
    })
}

/// Prometheus exposition, when a recorder is installed
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
