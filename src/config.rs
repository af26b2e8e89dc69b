use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub agent_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            agent_timeout_secs: env_secs("PERRY_AGENT_TIMEOUT_SECS", DEFAULT_AGENT_TIMEOUT_SECS),
            sweep_interval_secs: env_secs("PERRY_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            ..CacheConfig::default()
        }
    }
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default)
}

/// Eviction policy for the agent cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Inactivity after which an idle agent is dropped from memory.
    pub agent_timeout: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Re-check a due-but-busy agent on the next sweep instead of
    /// forgetting it until the next access.
    pub retry_busy: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retry_busy: true,
        }
    }
}
