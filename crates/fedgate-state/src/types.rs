//! Domain types for the fedgate state store.
//!
//! These types represent the persisted state of session pools: per-server
//! pool configuration, individual session records, and periodic metrics
//! snapshots. All types are serializable to/from JSON for storage in redb
//! tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a backend server (owned by the external catalog).
pub type ServerId = String;

/// Unique identifier for a session within its pool.
pub type SessionId = u64;

// ── Strategy ───────────────────────────────────────────────────────

/// Allocation strategy for idle sessions in a pool.
///
/// The closed set of strategies the pool supports; the pool dispatches
/// through one selection interface so adding a strategy never touches the
/// pool's locking logic.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Cycle through idle sessions in insertion order, wrapping.
    #[default]
    RoundRobin,
    /// Prefer the session with the lowest historical use count.
    LeastConnections,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::RoundRobin => write!(f, "round_robin"),
            StrategyKind::LeastConnections => write!(f, "least_connections"),
        }
    }
}

// ── Session ────────────────────────────────────────────────────────

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// In the pool's idle set, available for acquire.
    Idle,
    /// Borrowed by exactly one caller.
    Active,
    /// Removed from the idle set while a health probe runs.
    Validating,
    /// Past recycle age, being retired.
    Recycling,
    /// Closed and no longer usable.
    Closed,
}

/// Persisted record of a single pooled session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub server_id: ServerId,
    pub state: SessionState,
    /// Unix timestamp (seconds) when the session was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when the session was last acquired/released.
    pub last_used_at: u64,
    /// Number of times this session has been handed out.
    pub use_count: u64,
    /// Unix timestamp (seconds) of the last health check, if any.
    pub last_health_check_at: Option<u64>,
    /// Result of the last health check.
    pub last_health_ok: bool,
}

impl SessionRecord {
    /// Composite table key: `{server_id}:{session_id}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.server_id, self.id)
    }
}

// ── Pool configuration ─────────────────────────────────────────────

/// Persisted per-server pool configuration.
///
/// The effective configuration a pool runs with is the process defaults
/// merged with this record; the merge happens once at pool creation or
/// resize time, never ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfigRecord {
    pub server_id: ServerId,
    /// Whether pooling is enabled for this server at all.
    pub enabled: bool,
    pub strategy: StrategyKind,
    pub min_size: u32,
    pub max_size: u32,
    /// Acquire timeout in seconds.
    pub acquire_timeout_secs: u64,
    /// Max session age in seconds before forced retirement; 0 disables.
    pub recycle_seconds: u64,
    /// Validate a session's liveness before handing it out.
    pub pre_ping: bool,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this record was last updated.
    pub updated_at: u64,
}

impl PoolConfigRecord {
    pub fn table_key(&self) -> &str {
        &self.server_id
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Immutable per-pool metrics snapshot.
///
/// Produced by the metrics collector on each snapshot cycle and persisted
/// here; a snapshot is superseded by the next cycle, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolMetricsRecord {
    pub server_id: ServerId,
    /// Unix timestamp (seconds) when the snapshot was taken.
    pub epoch: u64,
    /// Rolling fraction of recent health checks that passed, in [0.0, 1.0].
    pub health_score: f64,
    pub sessions_idle: u32,
    pub sessions_active: u32,
    pub sessions_total: u32,
    /// P50 acquire wait time (milliseconds) over the snapshot window.
    pub wait_p50_ms: f64,
    /// P99 acquire wait time (milliseconds) over the snapshot window.
    pub wait_p99_ms: f64,
    /// Number of wait samples in the snapshot window.
    pub wait_samples: u64,
    pub timeouts_total: u64,
    pub creates_total: u64,
    pub releases_total: u64,
    /// releases_total / creates_total; 0.0 when nothing was created yet.
    pub reuse_rate: f64,
}

impl PoolMetricsRecord {
    /// Composite table key: `{server_id}:{epoch:020}` (zero-padded so
    /// lexicographic order matches time order).
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.server_id, self.epoch)
    }
}
