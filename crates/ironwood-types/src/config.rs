//! Store configuration.
//!
//! Serialized key names match the engine's canonical camelCase settings
//! so a config file written for the management surface round-trips
//! through serde unchanged. Every field has a standalone default; a
//! partial config deserializes with the remaining fields defaulted.

use serde::{Deserialize, Serialize};

/// Configuration knobs consumed by the core engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Capacity of the full-iterable cache, in entries.
    pub entity_iterable_cache_size: usize,

    /// Capacity of the iterable-counts sub-cache, in entries.
    pub entity_iterable_cache_counts_cache_size: usize,

    /// Number of dedicated caching worker threads.
    pub entity_iterable_cache_thread_count: usize,

    /// Milliseconds between a fingerprint's first sighting and real
    /// admission when the cache is not sparse.
    pub entity_iterable_cache_deferred_delay: u64,

    /// Wall-clock budget in milliseconds for a consistent caching job.
    pub entity_iterable_cache_caching_timeout: u64,

    /// Wall-clock budget in milliseconds for a counts-only caching job.
    pub entity_iterable_cache_counts_caching_timeout: u64,

    /// Maximum milliseconds a job may wait on the queue before it
    /// abandons instead of starting.
    pub entity_iterable_cache_start_caching_timeout: u64,

    /// Render fingerprints human-readably in telemetry log lines.
    pub entity_iterable_cache_use_human_readable: bool,

    /// Global kill switch for the iterable cache.
    pub is_caching_disabled: bool,

    /// Milliseconds between stuck-transaction monitor ticks.
    pub env_monitor_txns_check_freq: u64,

    /// Soft timeout in milliseconds: transactions older than this are
    /// logged with their creation context. `0` disables the check.
    pub env_monitor_txns_timeout: u64,

    /// Hard timeout in milliseconds: transactions older than this are
    /// forcibly finished. `0` disables the check.
    pub env_monitor_txns_expiration_timeout: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            entity_iterable_cache_size: 4096,
            entity_iterable_cache_counts_cache_size: 65536,
            entity_iterable_cache_thread_count: 2,
            entity_iterable_cache_deferred_delay: 2000,
            entity_iterable_cache_caching_timeout: 10_000,
            entity_iterable_cache_counts_caching_timeout: 100_000,
            entity_iterable_cache_start_caching_timeout: 7000,
            entity_iterable_cache_use_human_readable: false,
            is_caching_disabled: false,
            env_monitor_txns_check_freq: 60_000,
            env_monitor_txns_timeout: 0,
            env_monitor_txns_expiration_timeout: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.entity_iterable_cache_size, 4096);
        assert_eq!(config.entity_iterable_cache_thread_count, 2);
        assert_eq!(config.entity_iterable_cache_deferred_delay, 2000);
        assert!(!config.is_caching_disabled);
        assert_eq!(config.env_monitor_txns_timeout, 0);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_string(&StoreConfig::default()).unwrap();
        assert!(json.contains("\"entityIterableCacheSize\":4096"));
        assert!(json.contains("\"envMonitorTxnsCheckFreq\":60000"));
        assert!(json.contains("\"isCachingDisabled\":false"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"entityIterableCacheSize": 128, "isCachingDisabled": true}"#)
                .unwrap();
        assert_eq!(config.entity_iterable_cache_size, 128);
        assert!(config.is_caching_disabled);
        assert_eq!(config.entity_iterable_cache_deferred_delay, 2000);
    }
}
