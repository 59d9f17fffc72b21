//! Engine-wide configuration: worker pool sizing, component ceilings, and
//! the bookkeeping constants consumed by the log-shard picker and the
//! rule/script history retention external collaborators expect.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_WORKERS: usize = 100_000;
pub const DEFAULT_IDLE_RECLAIM_SECS: u64 = 60;
pub const DEFAULT_MAX_COMPONENT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 5;
pub const DEFAULT_LOG_SHARD_COUNT: usize = 32;
pub const DEFAULT_HISTORY_COUNT: usize = 3;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

/// Process-wide engine limits.
///
/// All fields have safe defaults; every one can be overridden from the
/// environment via [`EngineConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of concurrently running worker-pool tasks.
    pub max_workers: usize,

    /// How long an idle worker slot sits reclaimable before it is dropped.
    pub idle_reclaim: Duration,

    /// Hard ceiling on a single component's wall-clock time, regardless of
    /// what the component's own `timeout_s` requests.
    pub max_component_timeout: Duration,

    /// Hard ceiling on `retry_max_count`, regardless of what the component
    /// itself requests.
    pub max_retry_count: u32,

    /// Number of log-table shards the consistent-hash ring picks across.
    pub log_shard_count: usize,

    /// Number of historical rule/script versions the persistent store is
    /// expected to retain.
    pub history_count: usize,

    /// Default TTL applied to RequestCache entries.
    pub cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            idle_reclaim: Duration::from_secs(DEFAULT_IDLE_RECLAIM_SECS),
            max_component_timeout: Duration::from_secs(DEFAULT_MAX_COMPONENT_TIMEOUT_SECS),
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            log_shard_count: DEFAULT_LOG_SHARD_COUNT,
            history_count: DEFAULT_HISTORY_COUNT,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl EngineConfig {
    /// Loads overrides from the environment, falling back to defaults for
    /// anything unset or unparsable.
    ///
    /// Supported variables: `ENGINE_MAX_WORKERS`, `ENGINE_IDLE_RECLAIM_SECS`,
    /// `ENGINE_MAX_COMPONENT_TIMEOUT_SECS`, `ENGINE_MAX_RETRY_COUNT`,
    /// `ENGINE_LOG_SHARD_COUNT`, `ENGINE_HISTORY_COUNT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ENGINE_MAX_WORKERS") {
            if let Ok(n) = val.parse() {
                config.max_workers = n;
            }
        }

        if let Ok(val) = std::env::var("ENGINE_IDLE_RECLAIM_SECS") {
            if let Ok(n) = val.parse() {
                config.idle_reclaim = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("ENGINE_MAX_COMPONENT_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.max_component_timeout = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("ENGINE_MAX_RETRY_COUNT") {
            if let Ok(n) = val.parse() {
                config.max_retry_count = n;
            }
        }

        if let Ok(val) = std::env::var("ENGINE_LOG_SHARD_COUNT") {
            if let Ok(n) = val.parse() {
                config.log_shard_count = n;
            }
        }

        if let Ok(val) = std::env::var("ENGINE_HISTORY_COUNT") {
            if let Ok(n) = val.parse() {
                config.history_count = n;
            }
        }

        config
    }

    /// Clamps a component's requested retry count to the engine ceiling.
    pub fn clamp_retry_count(&self, requested: u32) -> u32 {
        requested.min(self.max_retry_count)
    }

    /// Clamps a component's requested timeout to the engine ceiling.
    pub fn clamp_timeout(&self, requested: Duration) -> Duration {
        requested.min(self.max_component_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.max_workers, 100_000);
        assert_eq!(config.max_retry_count, 5);
        assert_eq!(config.log_shard_count, 32);
        assert_eq!(config.history_count, 3);
    }

    #[test]
    fn clamp_retry_count_never_exceeds_ceiling() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_retry_count(2), 2);
        assert_eq!(config.clamp_retry_count(99), 5);
    }

    #[test]
    fn clamp_timeout_never_exceeds_ceiling() {
        let config = EngineConfig::default();
        assert_eq!(
            config.clamp_timeout(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.clamp_timeout(Duration::from_secs(500)),
            Duration::from_secs(60)
        );
    }
}
