//! PoolManager — the process-wide session pool registry.
//!
//! Pools are created lazily on first use for servers whose pooling is
//! enabled, discoverable by backend-server id from any request path, and
//! torn down explicitly on server removal or shutdown. Three background
//! loops run on independent timers so a slow health probe can never delay
//! idle cleanup, and vice versa.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fedgate_health::HealthChecker;
use fedgate_metrics::MetricsCollector;
use fedgate_pool::{PoolStats, PooledSession, SessionPool, TransportFactory};
use fedgate_state::{PoolConfigRecord, StateStore};

use crate::config::{ManagerConfig, PoolOverride, config_from_record};
use crate::error::{ManagerError, ManagerResult};

/// Manages session pools across all backend servers.
pub struct PoolManager {
    config: ManagerConfig,
    factory: Arc<dyn TransportFactory>,
    checker: HealthChecker,
    state: StateStore,
    metrics: Arc<MetricsCollector>,
    /// Active pools: server_id → pool.
    pools: RwLock<HashMap<String, Arc<SessionPool>>>,
    /// Handles for the background loops.
    loops: Mutex<Vec<JoinHandle<()>>>,
    /// Shutdown signal for the background loops.
    shutdown_tx: watch::Sender<bool>,
}

impl PoolManager {
    /// Create a new pool manager. Loops are not started until `start`.
    pub fn new(
        config: ManagerConfig,
        factory: Arc<dyn TransportFactory>,
        state: StateStore,
    ) -> Arc<Self> {
        let metrics = Arc::new(MetricsCollector::new(state.clone()));
        let checker = HealthChecker::new(config.probe_timeout);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            config,
            factory,
            checker,
            state,
            metrics,
            pools: RwLock::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Spawn the background loops: cleanup, health sweep, and the metrics
    /// snapshot cycle, each on its own timer.
    pub async fn start(self: Arc<Self>) {
        let mut loops = self.loops.lock().await;
        loops.push(tokio::spawn(cleanup_loop(
            Arc::clone(&self),
            self.shutdown_tx.subscribe(),
        )));
        loops.push(tokio::spawn(health_loop(
            Arc::clone(&self),
            self.shutdown_tx.subscribe(),
        )));
        loops.push(tokio::spawn(snapshot_loop(
            Arc::clone(&self),
            self.shutdown_tx.subscribe(),
        )));
        info!(
            cleanup = ?self.config.cleanup_interval,
            health = ?self.config.health_check_interval,
            snapshot = ?self.config.snapshot_interval,
            "pool manager started"
        );
    }

    // ── Registry ───────────────────────────────────────────────────

    /// Get the pool for a server, creating it on first use.
    ///
    /// Idempotent and thread-safe: the first caller constructs the pool
    /// (pre-warming to `min_size`), later callers get the same instance.
    /// Servers without an enabled pooling record are rejected.
    pub async fn get_or_create_pool(&self, server_id: &str) -> ManagerResult<Arc<SessionPool>> {
        // Fast path.
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(server_id) {
                return Ok(Arc::clone(pool));
            }
        }

        // Load + merge the server's config before taking the write lock.
        let record = self
            .state
            .get_pool_config(server_id)?
            .ok_or_else(|| ManagerError::PoolingDisabled(server_id.to_string()))?;
        if !record.enabled {
            return Err(ManagerError::PoolingDisabled(server_id.to_string()));
        }
        let config = config_from_record(&record);

        let pool = {
            let mut pools = self.pools.write().await;
            // Another caller may have won the race while we read config.
            if let Some(pool) = pools.get(server_id) {
                return Ok(Arc::clone(pool));
            }
            let pool = Arc::new(SessionPool::new(
                server_id,
                config,
                Arc::clone(&self.factory),
                self.checker.clone(),
                Arc::clone(&self.metrics),
            )?);
            pools.insert(server_id.to_string(), Arc::clone(&pool));
            pool
        };

        // Pre-warm outside the registry lock; failure is non-fatal — the
        // pool still creates sessions on demand.
        if let Err(e) = pool.warm_up().await {
            warn!(%server_id, error = %e, "pool pre-warm failed");
        }

        info!(%server_id, "session pool created");
        Ok(pool)
    }

    /// Get the pool for a server if one is registered.
    pub async fn pool_for(&self, server_id: &str) -> Option<Arc<SessionPool>> {
        let pools = self.pools.read().await;
        pools.get(server_id).map(Arc::clone)
    }

    /// Server ids with registered pools.
    pub async fn registered_servers(&self) -> Vec<String> {
        let pools = self.pools.read().await;
        pools.keys().cloned().collect()
    }

    /// Statistics for every registered pool.
    pub async fn pool_stats(&self) -> HashMap<String, PoolStats> {
        let pools = self.pools_snapshot().await;
        let mut stats = HashMap::with_capacity(pools.len());
        for (server_id, pool) in pools {
            stats.insert(server_id, pool.stats().await);
        }
        stats
    }

    /// Acquire a session for a server, creating its pool on first use.
    pub async fn acquire_session(&self, server_id: &str) -> ManagerResult<PooledSession> {
        let pool = self.get_or_create_pool(server_id).await?;
        Ok(pool.acquire().await?)
    }

    /// Release a session back to its server's pool.
    ///
    /// If the pool was evicted while the session was borrowed, the session
    /// is simply closed.
    pub async fn release_session(&self, server_id: &str, session: PooledSession) {
        match self.pool_for(server_id).await {
            Some(pool) => pool.release(session).await,
            None => {
                warn!(%server_id, session_id = session.id(), "releasing session for evicted pool");
                let mut session = session;
                session.close().await;
            }
        }
    }

    // ── Admin surface ──────────────────────────────────────────────

    /// Apply a per-server override: persist the effective configuration
    /// and update any live pool (resize when enabled, drain+evict when
    /// disabled).
    pub async fn apply_override(
        &self,
        server_id: &str,
        override_: &PoolOverride,
    ) -> ManagerResult<()> {
        let effective = override_.merged_with(&self.config.defaults);
        // Fail fast before persisting anything.
        effective.validate()?;

        let now = epoch_secs();
        let created_at = self
            .state
            .get_pool_config(server_id)?
            .map(|r| r.created_at)
            .unwrap_or(now);
        let record = PoolConfigRecord {
            server_id: server_id.to_string(),
            enabled: override_.enabled,
            strategy: effective.strategy,
            min_size: effective.min_size,
            max_size: effective.max_size,
            acquire_timeout_secs: effective.acquire_timeout.as_secs(),
            recycle_seconds: effective.recycle_seconds,
            pre_ping: effective.pre_ping,
            created_at,
            updated_at: now,
        };
        self.state.put_pool_config(&record)?;

        if override_.enabled {
            if let Some(pool) = self.pool_for(server_id).await {
                pool.resize(effective).await?;
                info!(%server_id, "live pool resized from override");
            }
        } else {
            self.remove_pool(server_id).await?;
        }
        Ok(())
    }

    /// Drain and evict a server's pool. Safe to call when none exists.
    pub async fn remove_pool(&self, server_id: &str) -> ManagerResult<()> {
        let pool = {
            let mut pools = self.pools.write().await;
            pools.remove(server_id)
        };

        match pool {
            Some(pool) => {
                pool.drain().await;
                self.metrics.unregister(server_id).await;
                self.state.delete_sessions_for_server(server_id)?;
                info!(%server_id, "session pool removed");
            }
            None => {
                debug!(%server_id, "no pool to remove");
            }
        }
        Ok(())
    }

    /// Stop the background loops, drain every pool, and take a final
    /// metrics snapshot.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut loops = self.loops.lock().await;
        for handle in loops.drain(..) {
            let _ = handle.await;
        }
        drop(loops);

        let pools: Vec<(String, Arc<SessionPool>)> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };
        for (server_id, pool) in pools {
            pool.drain().await;
            debug!(%server_id, "pool drained on shutdown");
        }

        if let Err(e) = self.metrics.snapshot_all().await {
            warn!(error = %e, "final metrics snapshot failed");
        }
        info!("pool manager shutdown complete");
    }

    // ── Sweep cycles (one tick each; the loops call these) ─────────

    /// Recycle expired idle sessions in every pool.
    pub async fn run_cleanup_cycle(&self) {
        for (server_id, pool) in self.pools_snapshot().await {
            let closed = pool.sweep_expired().await;
            if closed > 0 {
                debug!(%server_id, closed, "cleanup cycle recycled idle sessions");
            }
        }
    }

    /// Health-check idle sessions in every pool.
    pub async fn run_health_cycle(&self) {
        for (server_id, pool) in self.pools_snapshot().await {
            let (checked, closed) = pool.health_sweep().await;
            if checked > 0 {
                debug!(%server_id, checked, closed, "health cycle completed");
            }
        }
    }

    /// Refresh gauges, persist snapshots and session records, and prune
    /// metrics history past retention.
    pub async fn run_snapshot_cycle(&self) {
        for (server_id, pool) in self.pools_snapshot().await {
            let stats = pool.stats().await;
            self.metrics
                .update_session_gauges(&server_id, stats.idle as u32, stats.active as u32)
                .await;
            for record in pool.session_records().await {
                if let Err(e) = self.state.put_session(&record) {
                    warn!(%server_id, error = %e, "failed to persist session record");
                }
            }
        }

        if let Err(e) = self.metrics.snapshot_all().await {
            error!(error = %e, "metrics snapshot cycle failed");
        }

        let retention_secs = u64::from(self.config.metrics_retention_days) * 86_400;
        let cutoff = epoch_secs().saturating_sub(retention_secs);
        if let Err(e) = self.metrics.prune_history_before(cutoff).await {
            warn!(error = %e, "metrics retention pruning failed");
        }
    }

    async fn pools_snapshot(&self) -> Vec<(String, Arc<SessionPool>)> {
        let pools = self.pools.read().await;
        pools
            .iter()
            .map(|(id, pool)| (id.clone(), Arc::clone(pool)))
            .collect()
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ── Background loops ───────────────────────────────────────────────

/// Recycles expired idle sessions on a fixed timer.
async fn cleanup_loop(manager: Arc<PoolManager>, mut shutdown: watch::Receiver<bool>) {
    let interval = manager.config.cleanup_interval;
    debug!(?interval, "cleanup loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                manager.run_cleanup_cycle().await;
            }
            _ = shutdown.changed() => {
                debug!("cleanup loop shutting down");
                break;
            }
        }
    }
}

/// Health-checks idle sessions on a fixed timer.
async fn health_loop(manager: Arc<PoolManager>, mut shutdown: watch::Receiver<bool>) {
    let interval = manager.config.health_check_interval;
    debug!(?interval, "health loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                manager.run_health_cycle().await;
            }
            _ = shutdown.changed() => {
                debug!("health loop shutting down");
                break;
            }
        }
    }
}

/// Persists metrics snapshots and session records on a fixed timer.
async fn snapshot_loop(manager: Arc<PoolManager>, mut shutdown: watch::Receiver<bool>) {
    let interval = manager.config.snapshot_interval;
    debug!(?interval, "snapshot loop starting");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                manager.run_snapshot_cycle().await;
            }
            _ = shutdown.changed() => {
                debug!("snapshot loop shutting down");
                break;
            }
        }
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use fedgate_health::Probe;
    use fedgate_pool::{BackendSession, PoolError};
    use fedgate_state::{SessionState, StrategyKind};

    struct MockTransport {
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Probe for MockTransport {
        async fn ping(&mut self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl BackendSession for MockTransport {
        async fn close(&mut self) {}
    }

    struct MockFactory {
        connects: AtomicU64,
        alive_flags: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl MockFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicU64::new(0),
                alive_flags: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn connects(&self) -> u64 {
            self.connects.load(Ordering::Relaxed)
        }

        fn kill_transport(&self, index: usize) {
            let flags = self.alive_flags.lock().unwrap();
            flags[index].store(false, Ordering::Relaxed);
        }
    }

    #[async_trait]
    impl TransportFactory for MockFactory {
        async fn connect(&self, _server_id: &str) -> anyhow::Result<Box<dyn BackendSession>> {
            self.connects.fetch_add(1, Ordering::Relaxed);
            let alive = Arc::new(AtomicBool::new(true));
            self.alive_flags.lock().unwrap().push(Arc::clone(&alive));
            Ok(Box::new(MockTransport { alive }))
        }
    }

    fn test_manager() -> (Arc<PoolManager>, Arc<MockFactory>, StateStore) {
        let factory = MockFactory::new();
        let state = StateStore::open_in_memory().unwrap();
        let manager = PoolManager::new(
            ManagerConfig::default(),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            state.clone(),
        );
        (manager, factory, state)
    }

    fn small_override() -> PoolOverride {
        PoolOverride {
            enabled: true,
            min_size: Some(2),
            max_size: Some(4),
            pre_ping: Some(false),
            ..PoolOverride::default()
        }
    }

    #[tokio::test]
    async fn get_or_create_requires_enabled_record() {
        let (manager, _, _) = test_manager();

        let err = manager.get_or_create_pool("srv-1").await.unwrap_err();
        assert!(matches!(err, ManagerError::PoolingDisabled(_)));
    }

    #[tokio::test]
    async fn disabled_record_is_rejected() {
        let (manager, _, _) = test_manager();
        let override_ = PoolOverride {
            enabled: false,
            ..small_override()
        };
        manager.apply_override("srv-1", &override_).await.unwrap();

        let err = manager.get_or_create_pool("srv-1").await.unwrap_err();
        assert!(matches!(err, ManagerError::PoolingDisabled(_)));
    }

    #[tokio::test]
    async fn create_prewarms_to_min_size() {
        let (manager, factory, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();

        let pool = manager.get_or_create_pool("srv-1").await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.idle, 2);
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (manager, factory, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();

        let a = manager.get_or_create_pool("srv-1").await.unwrap();
        let b = manager.get_or_create_pool("srv-1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        // Warmed only once.
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test]
    async fn acquire_and_release_through_manager() {
        let (manager, _, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();

        let session = manager.acquire_session("srv-1").await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        manager.release_session("srv-1", session).await;

        let stats = manager.pool_stats().await;
        assert_eq!(stats["srv-1"].active, 0);
        assert_eq!(stats["srv-1"].idle, 2);
    }

    #[tokio::test]
    async fn override_merges_over_defaults() {
        let (manager, _, state) = test_manager();
        let override_ = PoolOverride {
            enabled: true,
            strategy: Some(StrategyKind::LeastConnections),
            max_size: Some(3),
            ..PoolOverride::default()
        };
        manager.apply_override("srv-1", &override_).await.unwrap();

        let record = state.get_pool_config("srv-1").unwrap().unwrap();
        assert!(record.enabled);
        assert_eq!(record.strategy, StrategyKind::LeastConnections);
        assert_eq!(record.max_size, 3);
        // Defaults filled the rest.
        assert_eq!(record.min_size, 1);
        assert_eq!(record.acquire_timeout_secs, 30);
    }

    #[tokio::test]
    async fn invalid_override_fails_fast_without_persisting() {
        let (manager, _, state) = test_manager();
        let override_ = PoolOverride {
            enabled: true,
            min_size: Some(9),
            max_size: Some(2),
            ..PoolOverride::default()
        };

        let err = manager.apply_override("srv-1", &override_).await.unwrap_err();
        assert!(matches!(err, ManagerError::Pool(PoolError::InvalidConfig(_))));
        assert!(state.get_pool_config("srv-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn override_resizes_live_pool() {
        let (manager, _, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();
        let pool = manager.get_or_create_pool("srv-1").await.unwrap();
        assert_eq!(pool.stats().await.max_size, 4);

        let mut shrunk = small_override();
        shrunk.max_size = Some(3);
        shrunk.min_size = Some(1);
        manager.apply_override("srv-1", &shrunk).await.unwrap();

        assert_eq!(pool.stats().await.max_size, 3);
    }

    #[tokio::test]
    async fn disabling_override_evicts_pool() {
        let (manager, _, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();
        manager.get_or_create_pool("srv-1").await.unwrap();

        let disabled = PoolOverride {
            enabled: false,
            ..small_override()
        };
        manager.apply_override("srv-1", &disabled).await.unwrap();

        assert!(manager.pool_for("srv-1").await.is_none());
        let err = manager.acquire_session("srv-1").await.unwrap_err();
        assert!(matches!(err, ManagerError::PoolingDisabled(_)));
    }

    #[tokio::test]
    async fn remove_pool_is_safe_when_absent() {
        let (manager, _, _) = test_manager();
        manager.remove_pool("nope").await.unwrap();
    }

    #[tokio::test]
    async fn remove_pool_drains_and_closes_orphan_release() {
        let (manager, _, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();

        let session = manager.acquire_session("srv-1").await.unwrap();
        manager.remove_pool("srv-1").await.unwrap();
        assert!(manager.pool_for("srv-1").await.is_none());

        // Releasing after eviction closes the session instead of leaking.
        manager.release_session("srv-1", session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_cycle_recycles_expired_sessions() {
        let (manager, _, _) = test_manager();
        let mut override_ = small_override();
        override_.recycle_seconds = Some(60);
        manager.apply_override("srv-1", &override_).await.unwrap();
        let pool = manager.get_or_create_pool("srv-1").await.unwrap();
        assert_eq!(pool.stats().await.idle, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        manager.run_cleanup_cycle().await;
        assert_eq!(pool.stats().await.idle, 0);
    }

    #[tokio::test]
    async fn health_cycle_closes_dead_sessions() {
        let (manager, factory, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();
        let pool = manager.get_or_create_pool("srv-1").await.unwrap();
        factory.kill_transport(0);

        manager.run_health_cycle().await;
        assert_eq!(pool.stats().await.idle, 1);
        assert!(manager.metrics().health_score("srv-1").await < 1.0);
    }

    #[tokio::test]
    async fn snapshot_cycle_persists_metrics_and_sessions() {
        let (manager, _, state) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();
        manager.get_or_create_pool("srv-1").await.unwrap();

        manager.run_snapshot_cycle().await;

        let snapshots = state.list_metrics_for_server("srv-1", 10).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].sessions_idle, 2);
        assert_eq!(snapshots[0].creates_total, 2);

        let sessions = state.list_sessions_for_server("srv-1").unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_loops_and_drains_pools() {
        let (manager, _, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();
        let pool = manager.get_or_create_pool("srv-1").await.unwrap();

        Arc::clone(&manager).start().await;
        manager.shutdown().await;

        assert!(pool.is_draining().await);
        assert!(manager.registered_servers().await.is_empty());
    }

    #[tokio::test]
    async fn pool_stats_lists_all_registered_pools() {
        let (manager, _, _) = test_manager();
        manager
            .apply_override("srv-1", &small_override())
            .await
            .unwrap();
        manager
            .apply_override("srv-2", &small_override())
            .await
            .unwrap();
        manager.get_or_create_pool("srv-1").await.unwrap();
        manager.get_or_create_pool("srv-2").await.unwrap();

        let stats = manager.pool_stats().await;
        assert_eq!(stats.len(), 2);
        assert!(stats.contains_key("srv-1"));
        assert!(stats.contains_key("srv-2"));
    }
}
