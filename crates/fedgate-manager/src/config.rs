//! Manager configuration and per-server overrides.
//!
//! The effective configuration a pool runs with is an explicit merge:
//! process defaults ← per-server override, computed once at pool creation
//! or resize time. Nothing re-reads configuration ad hoc, so concurrent
//! config reads can never race pool operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fedgate_pool::PoolConfig;
use fedgate_state::{PoolConfigRecord, StrategyKind};

/// Process-wide manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Default pool configuration for servers without overrides.
    pub defaults: PoolConfig,
    /// How often the cleanup loop recycles expired idle sessions.
    pub cleanup_interval: Duration,
    /// How often the health loop sweeps idle sessions.
    pub health_check_interval: Duration,
    /// How often the snapshot cycle runs.
    pub snapshot_interval: Duration,
    /// How long persisted metrics snapshots are kept.
    pub metrics_retention_days: u32,
    /// Per-probe timeout for health checks.
    pub probe_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            defaults: PoolConfig::default(),
            cleanup_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(60),
            metrics_retention_days: 30,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Per-server pooling override, consumed from the admin surface.
///
/// Unset fields fall back to the process defaults. `enabled` has no
/// default fallback: pooling is opt-in per server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PoolOverride {
    pub enabled: bool,
    pub strategy: Option<StrategyKind>,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub recycle_seconds: Option<u64>,
    pub pre_ping: Option<bool>,
}

impl PoolOverride {
    /// An override that enables pooling with all defaults.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Merge this override over the process defaults into an effective
    /// pool configuration.
    pub fn merged_with(&self, defaults: &PoolConfig) -> PoolConfig {
        PoolConfig {
            strategy: self.strategy.unwrap_or(defaults.strategy),
            min_size: self.min_size.unwrap_or(defaults.min_size),
            max_size: self.max_size.unwrap_or(defaults.max_size),
            acquire_timeout: self
                .acquire_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            recycle_seconds: self.recycle_seconds.unwrap_or(defaults.recycle_seconds),
            pre_ping: self.pre_ping.unwrap_or(defaults.pre_ping),
        }
    }
}

/// Rebuild the effective pool configuration from a persisted record.
pub(crate) fn config_from_record(record: &PoolConfigRecord) -> PoolConfig {
    PoolConfig {
        strategy: record.strategy,
        min_size: record.min_size,
        max_size: record.max_size,
        acquire_timeout: Duration::from_secs(record.acquire_timeout_secs),
        recycle_seconds: record.recycle_seconds,
        pre_ping: record.pre_ping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_override_keeps_defaults() {
        let defaults = PoolConfig::default();
        let merged = PoolOverride::enabled().merged_with(&defaults);
        assert_eq!(merged, defaults);
    }

    #[test]
    fn set_fields_win_over_defaults() {
        let defaults = PoolConfig::default();
        let override_ = PoolOverride {
            enabled: true,
            strategy: Some(StrategyKind::LeastConnections),
            max_size: Some(25),
            acquire_timeout_secs: Some(5),
            ..PoolOverride::default()
        };

        let merged = override_.merged_with(&defaults);
        assert_eq!(merged.strategy, StrategyKind::LeastConnections);
        assert_eq!(merged.max_size, 25);
        assert_eq!(merged.acquire_timeout, Duration::from_secs(5));
        // Untouched fields fall back.
        assert_eq!(merged.min_size, defaults.min_size);
        assert_eq!(merged.recycle_seconds, defaults.recycle_seconds);
        assert_eq!(merged.pre_ping, defaults.pre_ping);
    }

    #[test]
    fn record_round_trips_to_config() {
        let record = PoolConfigRecord {
            server_id: "srv-1".to_string(),
            enabled: true,
            strategy: StrategyKind::LeastConnections,
            min_size: 2,
            max_size: 8,
            acquire_timeout_secs: 10,
            recycle_seconds: 120,
            pre_ping: false,
            created_at: 1000,
            updated_at: 1000,
        };

        let config = config_from_record(&record);
        assert_eq!(config.strategy, StrategyKind::LeastConnections);
        assert_eq!(config.min_size, 2);
        assert_eq!(config.max_size, 8);
        assert_eq!(config.acquire_timeout, Duration::from_secs(10));
        assert_eq!(config.recycle_seconds, 120);
        assert!(!config.pre_ping);
    }

    #[test]
    fn manager_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.snapshot_interval, Duration::from_secs(60));
        assert_eq!(config.metrics_retention_days, 30);
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
    }

    #[test]
    fn override_serde_round_trip() {
        let override_ = PoolOverride {
            enabled: true,
            strategy: Some(StrategyKind::RoundRobin),
            min_size: Some(1),
            max_size: Some(4),
            acquire_timeout_secs: None,
            recycle_seconds: Some(0),
            pre_ping: Some(true),
        };

        let json = serde_json::to_string(&override_).unwrap();
        let back: PoolOverride = serde_json::from_str(&json).unwrap();
        assert_eq!(back, override_);
    }
}
