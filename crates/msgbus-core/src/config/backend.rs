//! Backend store configuration.

use serde::{Deserialize, Serialize};

/// Top-level backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend provider type: `"memory"` or `"redis"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Redis-specific configuration.
    #[serde(default)]
    pub redis: RedisBackendConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            redis: RedisBackendConfig::default(),
        }
    }
}

/// Redis backend configuration.
///
/// Co-operating processes sharing one store MUST agree on `db`: it suffixes
/// both the key prefix and the fan-out channel name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisBackendConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Logical db index used to namespace keys and the fan-out channel.
    #[serde(default)]
    pub db: u32,
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            db: 0,
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
