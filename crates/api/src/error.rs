//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use session::SessionError;
use storage::StorageError;
use thiserror::Error;
use tracing::error;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics setup failed: {0}")]
    Metrics(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error body returned by HTTP handlers
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Session(SessionError::NotFound(_))
            | ApiError::Session(SessionError::Inactive(_))
            | ApiError::Session(SessionError::Storage(StorageError::NotFound(_)))
            | ApiError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Session(SessionError::Busy(_)) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Session(SessionError::Storage(_))
            | ApiError::Session(SessionError::Serialization(_))
            | ApiError::Session(SessionError::CorruptLog(_))
            | ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "session_log"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::SessionId;

    #[test]
    fn test_status_mapping() {
        let missing = ApiError::from(SessionError::NotFound(SessionId::new()));
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let busy = ApiError::from(SessionError::Busy(SessionId::new()));
        assert_eq!(busy.status_and_kind(), (StatusCode::CONFLICT, "conflict"));

        let log_failure = ApiError::from(SessionError::Storage(StorageError::Io {
            path: "session_log".into(),
            message: "disk full".into(),
        }));
        assert_eq!(log_failure.status_and_kind(), (StatusCode::INTERNAL_SERVER_ERROR, "session_log"));

        let corrupt = ApiError::from(SessionError::CorruptLog("truncated".into()));
        assert_eq!(corrupt.status_and_kind().1, "session_log");

        let task = ApiError::Task("panicked".into());
        assert_eq!(task.status_and_kind(), (StatusCode::INTERNAL_SERVER_ERROR, "internal"));
    }
}
