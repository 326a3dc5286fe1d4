//! Gaze Proctor API Server
//!
//! REST API for the session lifecycle and a WebSocket stream carrying webcam
//! frames into live proctoring sessions.

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::GovernorLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod telemetry;

pub use config::{AppConfig, LogFormat, ServerConfig, StorageConfig};
pub use error::ApiError;
pub use rate_limit::RateLimitConfig;
pub use telemetry::init_logging;

use gaze::{LandmarkProvider, UnavailableProvider};
use session::{SessionEvaluator, SessionRegistry};
use storage::{EvidenceStore, FileRepository, SessionLogStore};

/// Builds one landmark provider per stream connection
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn LandmarkProvider> + Send + Sync>;

/// Application state shared across handlers
pub struct AppState {
    /// Live sessions
    pub registry: SessionRegistry,
    pub evaluator: SessionEvaluator,
    /// Evidence image store
    pub evidence: Arc<dyn EvidenceStore>,
    /// Durable session log store
    pub logs: Arc<dyn SessionLogStore>,
    pub providers: ProviderFactory,
    pub detector_name: String,
    pub storage_backend: String,
    pub max_consecutive_failures: u32,
    /// Prometheus handle, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create state backed by the configured directories
    pub fn new(config: &AppConfig) -> Result<Self, ApiError> {
        let repository = Arc::new(FileRepository::new(
            &config.storage.image_dir,
            &config.storage.log_dir,
        )?);
        let backend = format!("filesystem:{}", config.storage.log_dir.display());
        Self::with_stores(config, repository.clone(), repository, backend)
    }

    /// Create state over explicit stores
    pub fn with_stores(
        config: &AppConfig,
        evidence: Arc<dyn EvidenceStore>,
        logs: Arc<dyn SessionLogStore>,
        storage_backend: impl Into<String>,
    ) -> Result<Self, ApiError> {
        config.validate()?;
        Ok(Self {
            registry: SessionRegistry::new(config.gaze.clone())?,
            evaluator: SessionEvaluator::new(config.evaluation.clone()),
            evidence,
            logs,
            providers: Arc::new(|| Box::new(UnavailableProvider) as Box<dyn LandmarkProvider>),
            detector_name: UnavailableProvider.name().to_string(),
            storage_backend: storage_backend.into(),
            max_consecutive_failures: config.server.max_consecutive_failures,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        })
    }

    /// Use a server-side landmark detector for image-only frames
    pub fn with_provider_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn LandmarkProvider> + Send + Sync + 'static,
    {
        self.detector_name = factory().name().to_string();
        self.providers = Arc::new(factory);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, rate_limit: &RateLimitConfig) -> Result<Router, ApiError> {
    let mut sessions = Router::new()
        .route("/api/v1/sessions", post(routes::sessions::start_session))
        .route("/api/v1/sessions/:id/end", post(routes::sessions::end_session))
        .route("/api/v1/sessions/:id/verdict", get(routes::sessions::get_verdict));
    if let Some(config) = rate_limit::create_governor_config(rate_limit)? {
        sessions = sessions.layer(GovernorLayer { config });
    }

    let router = Router::new()
        .route("/", get(routes::health::root_handler))
        .route("/health", get(routes::health::health_handler))
        .route("/api/v1/health", get(routes::health::health_handler))
        .route("/metrics", get(routes::health::metrics_handler))
        .route("/ws", get(routes::stream::stream_handler))
        .merge(sessions)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);
    Ok(router)
}

/// Periodically finalize sessions abandoned without an end request
pub fn spawn_idle_reaper(state: Arc<AppState>, idle: Duration, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let worker = Arc::clone(&state);
            let reaped = tokio::task::spawn_blocking(move || {
                routes::sessions::reap_idle_sessions(&worker, idle, Instant::now())
            })
            .await;
            match reaped {
                Ok(0) => {}
                Ok(count) => telemetry::record_sessions_evicted(count),
                Err(e) => warn!("Idle session sweep failed: {}", e),
            }
        }
    })
}

/// Run the server until it fails
pub async fn run_server(config: AppConfig) -> Result<(), ApiError> {
    let mut state = AppState::new(&config)?;
    match telemetry::install_prometheus() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!("Metrics disabled: {}", e),
    }

    let state = Arc::new(state);
    let app = create_router(Arc::clone(&state), &config.rate_limit)?;
    spawn_idle_reaper(
        state,
        config.server.session_idle_timeout(),
        config.server.idle_sweep_interval(),
    );

    info!("Starting API server on {}", config.server.addr);
    info!(
        "Evidence in {}, session logs in {}",
        config.storage.image_dir.display(),
        config.storage.log_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use session::{SessionId, SessionVerdict};
    use storage::MemoryRepository;
    use tower::ServiceExt;

    fn test_app() -> (Arc<AppState>, Router) {
        let config = AppConfig::default();
        let store = Arc::new(MemoryRepository::new());
        let state = Arc::new(AppState::with_stores(&config, store.clone(), store, "memory").unwrap());
        let rate_limit = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        let router = create_router(Arc::clone(&state), &rate_limit).unwrap();
        (state, router)
    }

    async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let (_, router) = test_app();

        let (status, body) = send(&router, "GET", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Server is up and running");
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&router, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metrics"]["active_sessions"], 0);
        assert_eq!(body["components"]["storage"]["backend"], "memory");
        assert_eq!(body["components"]["detector"]["status"], "client_landmarks_only");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (state, router) = test_app();

        let (status, body) = send(&router, "POST", "/api/v1/sessions").await;
        assert_eq!(status, StatusCode::CREATED);
        let id: SessionId = serde_json::from_value(body["session_id"].clone()).unwrap();
        assert_eq!(state.registry.len(), 1);

        let (status, body) = send(&router, "POST", &format!("/api/v1/sessions/{}/end", id)).await;
        assert_eq!(status, StatusCode::OK);
        let verdict: SessionVerdict = serde_json::from_value(body).unwrap();
        assert_eq!(verdict.session_id, id);
        assert_eq!(verdict.flagged_count, 0);
        assert!(!verdict.is_malpractice);
        assert!(state.registry.is_empty());

        // The verdict survives the session through its durable log
        let (status, body) = send(&router, "GET", &format!("/api/v1/sessions/{}/verdict", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_value::<SessionVerdict>(body).unwrap(), verdict);

        let (status, body) = send(&router, "POST", &format!("/api/v1/sessions/{}/end", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids() {
        let (_, router) = test_app();
        let unknown = SessionId::new();

        let (status, _) = send(&router, "POST", &format!("/api/v1/sessions/{}/end", unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, "GET", &format!("/api/v1/sessions/{}/verdict", unknown)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, "POST", "/api/v1/sessions/not-a-uuid/end").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_idle_session_finalized_and_judged() {
        let (state, router) = test_app();
        let (_, body) = send(&router, "POST", "/api/v1/sessions").await;
        let id: SessionId = serde_json::from_value(body["session_id"].clone()).unwrap();

        let idle = Duration::from_secs(900);
        assert_eq!(routes::sessions::reap_idle_sessions(&state, idle, Instant::now()), 0);
        assert_eq!(state.registry.len(), 1);

        let later = Instant::now() + Duration::from_secs(901);
        assert_eq!(routes::sessions::reap_idle_sessions(&state, idle, later), 1);
        assert!(state.registry.is_empty());

        let (status, body) = send(&router, "GET", &format!("/api/v1/sessions/{}/verdict", id)).await;
        assert_eq!(status, StatusCode::OK);
        let verdict: SessionVerdict = serde_json::from_value(body).unwrap();
        assert_eq!(verdict.session_id, id);
        assert_eq!(verdict.total_events, 0);

        let (status, _) = send(&router, "POST", &format!("/api/v1/sessions/{}/end", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_absent_without_recorder() {
        let (_, router) = test_app();
        let (status, _) = send(&router, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_provider_factory_sets_detector_name() {
        struct Named;
        impl LandmarkProvider for Named {
            fn detect(
                &mut self,
                _frame: &frame_capture::VideoFrame,
            ) -> Result<Option<gaze::LandmarkFrame>, gaze::GazeError> {
                Ok(None)
            }

            fn name(&self) -> &str {
                "named"
            }
        }

        let config = AppConfig::default();
        let store = Arc::new(MemoryRepository::new());
        let state = AppState::with_stores(&config, store.clone(), store, "memory")
            .unwrap()
            .with_provider_factory(|| Box::new(Named));
        assert_eq!(state.detector_name, "named");
        assert_eq!((state.providers)().name(), "named");
    }
}
