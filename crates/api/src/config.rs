//! Layered server configuration
//!
//! Built-in defaults, then an optional TOML file, then `GAZE_PROCTOR__`
//! environment variables (`GAZE_PROCTOR__SERVER__ADDR=0.0.0.0:9000`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File};
use gaze::GazeConfig;
use serde::{Deserialize, Serialize};
use session::EvaluationConfig;

use crate::rate_limit::RateLimitConfig;
use crate::ApiError;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_VAR: &str = "GAZE_PROCTOR_CONFIG";

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "gaze-proctor";

const ENV_PREFIX: &str = "GAZE_PROCTOR";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Consecutive failed frames after which a stream is closed
    pub max_consecutive_failures: u32,
    /// Seconds without frames after which a session with no stream is finalized
    pub session_idle_timeout_secs: u64,
    /// Seconds between idle session sweeps
    pub idle_sweep_interval_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            max_consecutive_failures: 10,
            session_idle_timeout_secs: 900,
            idle_sweep_interval_secs: 60,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Evidence and session log locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub image_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("suspicious_behaviour/image"),
            log_dir: PathBuf::from("suspicious_behaviour/session_log"),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gaze: GazeConfig,
    pub evaluation: EvaluationConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Load configuration, honoring `GAZE_PROCTOR_CONFIG`
    pub fn load() -> Result<Self, ApiError> {
        let explicit = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
        Self::load_from(explicit.as_deref())
    }

    /// Load configuration with an explicit file, which must then exist
    pub fn load_from(path: Option<&Path>) -> Result<Self, ApiError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the types cannot express
    pub fn validate(&self) -> Result<(), ApiError> {
        self.gaze
            .validate()
            .map_err(|e| ApiError::InvalidConfig(e.to_string()))?;
        if self.server.max_consecutive_failures == 0 {
            return Err(ApiError::InvalidConfig(
                "server.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.server.session_idle_timeout_secs == 0 || self.server.idle_sweep_interval_secs == 0 {
            return Err(ApiError::InvalidConfig(
                "server.session_idle_timeout_secs and server.idle_sweep_interval_secs must be positive"
                    .to_string(),
            ));
        }
        if self.rate_limit.enabled && (self.rate_limit.per_second == 0 || self.rate_limit.burst_size == 0) {
            return Err(ApiError::InvalidConfig(
                "rate_limit.per_second and rate_limit.burst_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
