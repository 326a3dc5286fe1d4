//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Limits session lifecycle requests per peer IP using tower_governor.
//! The WebSocket stream itself is not limited; one upgrade carries a whole
//! session of frames.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

use crate::ApiError;

/// Governor config with X-RateLimit-* headers enabled
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Seconds per replenished request
    pub per_second: u64,
    /// Burst size (max requests that can be made immediately)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: 2,
            burst_size: 5,
        }
    }
}

/// Create a rate limiting governor config, or `None` when disabled.
///
/// Uses PeerIpKeyExtractor, so the service must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_governor_config(
    config: &RateLimitConfig,
) -> Result<Option<Arc<DefaultGovernorConfig>>, ApiError> {
    if !config.enabled {
        return Ok(None);
    }

    let governor = GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .ok_or_else(|| {
            ApiError::InvalidConfig(format!(
                "rate limit needs positive per_second and burst_size, got {} and {}",
                config.per_second, config.burst_size
            ))
        })?;
    Ok(Some(Arc::new(governor)))
}
