//! Pool configuration.

use std::time::Duration;

use fedgate_state::StrategyKind;

use crate::error::{PoolError, PoolResult};

/// Configuration for one session pool.
///
/// Immutable snapshot: a pool swaps the whole struct on `resize` rather
/// than mutating fields in place, so concurrent reads never observe a
/// half-applied change.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// How idle sessions are chosen on acquire.
    pub strategy: StrategyKind,
    /// Number of sessions to keep warm.
    pub min_size: u32,
    /// Maximum sessions (idle + active) allowed.
    pub max_size: u32,
    /// Default wait bound for `acquire`.
    pub acquire_timeout: Duration,
    /// Max session age in seconds before forced retirement; 0 disables.
    pub recycle_seconds: u64,
    /// Validate a session's liveness before handing it out.
    pub pre_ping: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::RoundRobin,
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            recycle_seconds: 3600,
            pre_ping: true,
        }
    }
}

impl PoolConfig {
    /// Check the configuration invariants. Violations fail fast with
    /// `InvalidConfig` and leave any existing pool state unchanged.
    pub fn validate(&self) -> PoolResult<()> {
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "acquire_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Recycle age as a duration; `None` when age-based retirement is
    /// disabled.
    pub fn recycle_after(&self) -> Option<Duration> {
        (self.recycle_seconds > 0).then(|| Duration::from_secs(self.recycle_seconds))
    }
}
