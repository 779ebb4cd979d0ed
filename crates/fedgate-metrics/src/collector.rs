//! Metrics collector — tracks per-pool session metrics.
//!
//! Counters use atomics; wait-time samples go into a mutex-guarded window
//! that resets on each snapshot. Recording is fire-and-forget: a metrics
//! call can never fail or block an acquire/release on I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::debug;

use fedgate_health::HealthScore;
use fedgate_state::{PoolMetricsRecord, StateStore};

/// Per-pool metrics bucket.
struct PoolBucket {
    /// Cumulative sessions created.
    creates: AtomicU64,
    /// Cumulative releases (healthy or not).
    releases: AtomicU64,
    /// Cumulative acquire timeouts.
    timeouts: AtomicU64,
    /// Acquire wait samples (microseconds) for the current snapshot window.
    wait_samples_us: tokio::sync::Mutex<Vec<u64>>,
    /// Rolling health score fed by check verdicts.
    health: tokio::sync::Mutex<HealthScore>,
    /// Idle session count (set externally by the snapshot cycle).
    sessions_idle: AtomicU64,
    /// Active session count (set externally by the snapshot cycle).
    sessions_active: AtomicU64,
}

impl PoolBucket {
    fn new() -> Self {
        Self {
            creates: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            wait_samples_us: tokio::sync::Mutex::new(Vec::new()),
            health: tokio::sync::Mutex::new(HealthScore::new()),
            sessions_idle: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
        }
    }
}

/// Collects metrics across all pools and persists periodic snapshots to
/// the state store.
///
/// Buckets are created on the first event for a server id and removed via
/// `unregister` when the pool is evicted.
pub struct MetricsCollector {
    /// Per-pool buckets: server_id → bucket.
    buckets: RwLock<HashMap<String, Arc<PoolBucket>>>,
    /// The state store for persisting snapshots.
    state: StateStore,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(state: StateStore) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            state,
        }
    }

    /// Get (or lazily create) the bucket for a server.
    async fn bucket(&self, server_id: &str) -> Arc<PoolBucket> {
        {
            let buckets = self.buckets.read().await;
            if let Some(b) = buckets.get(server_id) {
                return Arc::clone(b);
            }
        }
        let mut buckets = self.buckets.write().await;
        Arc::clone(
            buckets
                .entry(server_id.to_string())
                .or_insert_with(|| Arc::new(PoolBucket::new())),
        )
    }

    /// Drop a pool's bucket (on pool eviction).
    pub async fn unregister(&self, server_id: &str) {
        let mut buckets = self.buckets.write().await;
        buckets.remove(server_id);
        debug!(%server_id, "metrics bucket removed");
    }

    /// List server ids with live buckets.
    pub async fn tracked_pools(&self) -> Vec<String> {
        let buckets = self.buckets.read().await;
        buckets.keys().cloned().collect()
    }

    // ── Recording ──────────────────────────────────────────────────

    /// Record a session creation.
    pub async fn record_create(&self, server_id: &str) {
        self.bucket(server_id)
            .await
            .creates
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session release (whether or not it returned to idle).
    pub async fn record_release(&self, server_id: &str) {
        self.bucket(server_id)
            .await
            .releases
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquire timeout.
    pub async fn record_timeout(&self, server_id: &str) {
        self.bucket(server_id)
            .await
            .timeouts
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long an acquire waited before getting a session.
    pub async fn record_wait(&self, server_id: &str, wait: Duration) {
        let bucket = self.bucket(server_id).await;
        bucket
            .wait_samples_us
            .lock()
            .await
            .push(wait.as_micros() as u64);
    }

    /// Fold a health check verdict into the pool's rolling score.
    pub async fn record_health(&self, server_id: &str, passed: bool) {
        let bucket = self.bucket(server_id).await;
        bucket.health.lock().await.record(passed);
    }

    /// Refresh the session-count gauges (from pool stats).
    pub async fn update_session_gauges(&self, server_id: &str, idle: u32, active: u32) {
        let bucket = self.bucket(server_id).await;
        bucket.sessions_idle.store(idle as u64, Ordering::Relaxed);
        bucket
            .sessions_active
            .store(active as u64, Ordering::Relaxed);
    }

    /// Current health score for a pool (1.0 if nothing recorded yet).
    pub async fn health_score(&self, server_id: &str) -> f64 {
        let bucket = self.bucket(server_id).await;
        let health = bucket.health.lock().await;
        health.value()
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Take a snapshot for one pool and persist it to the state store.
    ///
    /// The wait-sample window resets; cumulative counters do not.
    pub async fn snapshot(&self, server_id: &str) -> anyhow::Result<PoolMetricsRecord> {
        let bucket = self.bucket(server_id).await;

        let creates = bucket.creates.load(Ordering::Relaxed);
        let releases = bucket.releases.load(Ordering::Relaxed);
        let timeouts = bucket.timeouts.load(Ordering::Relaxed);
        let idle = bucket.sessions_idle.load(Ordering::Relaxed) as u32;
        let active = bucket.sessions_active.load(Ordering::Relaxed) as u32;
        let health_score = bucket.health.lock().await.value();

        let mut waits = bucket.wait_samples_us.lock().await;
        let (p50, p99) = compute_percentiles(&waits);
        let wait_samples = waits.len() as u64;
        waits.clear();
        drop(waits);

        let reuse_rate = if creates > 0 {
            releases as f64 / creates as f64
        } else {
            0.0
        };

        let snapshot = PoolMetricsRecord {
            server_id: server_id.to_string(),
            epoch: epoch_secs(),
            health_score,
            sessions_idle: idle,
            sessions_active: active,
            sessions_total: idle + active,
            wait_p50_ms: p50,
            wait_p99_ms: p99,
            wait_samples,
            timeouts_total: timeouts,
            creates_total: creates,
            releases_total: releases,
            reuse_rate,
        };

        self.state.put_metrics(&snapshot)?;
        Ok(snapshot)
    }

    /// Snapshot every tracked pool.
    pub async fn snapshot_all(&self) -> anyhow::Result<Vec<PoolMetricsRecord>> {
        let ids = self.tracked_pools().await;
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            snapshots.push(self.snapshot(&id).await?);
        }
        debug!(pools = snapshots.len(), "metrics snapshots persisted");
        Ok(snapshots)
    }

    /// Prune persisted snapshots older than the cutoff epoch.
    pub async fn prune_history_before(&self, cutoff_epoch: u64) -> anyhow::Result<u32> {
        Ok(self.state.delete_metrics_before(cutoff_epoch)?)
    }
}

/// Compute P50 and P99 wait time from samples (microseconds → milliseconds).
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
fn compute_percentiles(samples_us: &[u64]) -> (f64, f64) {
    if samples_us.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = samples_us.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
