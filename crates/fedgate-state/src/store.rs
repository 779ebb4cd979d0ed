//! StateStore — redb-backed persistence for the session pool core.
//!
//! Provides typed CRUD operations over pool configurations, session
//! records, and metrics snapshots. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        txn.open_table(POOL_METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Pool configurations ────────────────────────────────────────

    /// Insert or update a pool configuration record.
    pub fn put_pool_config(&self, record: &PoolConfigRecord) -> StateResult<()> {
        let key = record.table_key().to_string();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "pool config stored");
        Ok(())
    }

    /// Get the pool configuration for a server.
    pub fn get_pool_config(&self, server_id: &str) -> StateResult<Option<PoolConfigRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
        match table.get(server_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: PoolConfigRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all pool configuration records.
    pub fn list_pool_configs(&self) -> StateResult<Vec<PoolConfigRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: PoolConfigRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a server's pool configuration. Returns true if it existed.
    pub fn delete_pool_config(&self, server_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POOL_CONFIGS).map_err(map_err!(Table))?;
            existed = table.remove(server_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%server_id, existed, "pool config deleted");
        Ok(existed)
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Insert or update a session record.
    pub fn put_session(&self, record: &SessionRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a session record by its composite key.
    pub fn get_session(&self, key: &str) -> StateResult<Option<SessionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: SessionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all session records for a server.
    pub fn list_sessions_for_server(&self, server_id: &str) -> StateResult<Vec<SessionRecord>> {
        let prefix = format!("{server_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: SessionRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Delete all session records for a server. Returns number deleted.
    pub fn delete_sessions_for_server(&self, server_id: &str) -> StateResult<u32> {
        let prefix = format!("{server_id}:");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Insert a metrics snapshot.
    pub fn put_metrics(&self, snapshot: &PoolMetricsRecord) -> StateResult<()> {
        let key = snapshot.table_key();
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOL_METRICS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get recent metrics snapshots for a server (by key prefix scan).
    pub fn list_metrics_for_server(
        &self,
        server_id: &str,
        limit: usize,
    ) -> StateResult<Vec<PoolMetricsRecord>> {
        let prefix = format!("{server_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let snapshot: PoolMetricsRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(snapshot);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Delete metrics snapshots older than the cutoff epoch, across all
    /// servers. Returns number deleted. Used for retention pruning.
    pub fn delete_metrics_before(&self, cutoff_epoch: u64) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(POOL_METRICS).map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let snapshot: PoolMetricsRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if snapshot.epoch < cutoff_epoch {
                    expired.push(key.value().to_string());
                }
            }
            expired
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(POOL_METRICS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if count > 0 {
            debug!(count, cutoff_epoch, "pruned expired metrics snapshots");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool_config(server_id: &str) -> PoolConfigRecord {
        PoolConfigRecord {
            server_id: server_id.to_string(),
            enabled: true,
            strategy: StrategyKind::RoundRobin,
            min_size: 1,
            max_size: 10,
            acquire_timeout_secs: 30,
            recycle_seconds: 3600,
            pre_ping: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_session(server_id: &str, id: u64) -> SessionRecord {
        SessionRecord {
            id,
            server_id: server_id.to_string(),
            state: SessionState::Idle,
            created_at: 1000,
            last_used_at: 1000,
            use_count: 0,
            last_health_check_at: None,
            last_health_ok: true,
        }
    }

    fn test_metrics(server_id: &str, epoch: u64) -> PoolMetricsRecord {
        PoolMetricsRecord {
            server_id: server_id.to_string(),
            epoch,
            health_score: 0.95,
            sessions_idle: 2,
            sessions_active: 3,
            sessions_total: 5,
            wait_p50_ms: 1.5,
            wait_p99_ms: 20.0,
            wait_samples: 100,
            timeouts_total: 1,
            creates_total: 5,
            releases_total: 40,
            reuse_rate: 8.0,
        }
    }

    // ── Pool config CRUD ───────────────────────────────────────────

    #[test]
    fn pool_config_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_pool_config("srv-1");

        store.put_pool_config(&record).unwrap();
        let retrieved = store.get_pool_config("srv-1").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn pool_config_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_pool_config("nope").unwrap().is_none());
    }

    #[test]
    fn pool_config_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = test_pool_config("srv-1");
        store.put_pool_config(&record).unwrap();

        record.max_size = 20;
        record.updated_at = 2000;
        store.put_pool_config(&record).unwrap();

        let retrieved = store.get_pool_config("srv-1").unwrap().unwrap();
        assert_eq!(retrieved.max_size, 20);
        assert_eq!(retrieved.updated_at, 2000);
    }

    #[test]
    fn pool_config_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_pool_config(&test_pool_config("srv-1")).unwrap();
        store.put_pool_config(&test_pool_config("srv-2")).unwrap();

        assert_eq!(store.list_pool_configs().unwrap().len(), 2);
    }

    #[test]
    fn pool_config_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_pool_config(&test_pool_config("srv-1")).unwrap();

        assert!(store.delete_pool_config("srv-1").unwrap());
        assert!(!store.delete_pool_config("srv-1").unwrap());
        assert!(store.get_pool_config("srv-1").unwrap().is_none());
    }

    // ── Session CRUD ───────────────────────────────────────────────

    #[test]
    fn session_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_session("srv-1", 1);

        store.put_session(&record).unwrap();
        let retrieved = store.get_session("srv-1:1").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn session_list_for_server() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_session(&test_session("srv-1", 1)).unwrap();
        store.put_session(&test_session("srv-1", 2)).unwrap();
        store.put_session(&test_session("srv-2", 1)).unwrap();

        assert_eq!(store.list_sessions_for_server("srv-1").unwrap().len(), 2);
        assert_eq!(store.list_sessions_for_server("srv-2").unwrap().len(), 1);
    }

    #[test]
    fn session_delete_all_for_server() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_session(&test_session("srv-1", 1)).unwrap();
        store.put_session(&test_session("srv-1", 2)).unwrap();
        store.put_session(&test_session("srv-2", 1)).unwrap();

        let deleted = store.delete_sessions_for_server("srv-1").unwrap();
        assert_eq!(deleted, 2);
        assert!(store.list_sessions_for_server("srv-1").unwrap().is_empty());
        // srv-2 untouched
        assert_eq!(store.list_sessions_for_server("srv-2").unwrap().len(), 1);
    }

    // ── Metrics CRUD ───────────────────────────────────────────────

    #[test]
    fn metrics_put_and_list() {
        let store = StateStore::open_in_memory().unwrap();

        for epoch in [1000u64, 1060, 1120] {
            store.put_metrics(&test_metrics("srv-1", epoch)).unwrap();
        }

        let all = store.list_metrics_for_server("srv-1", 10).unwrap();
        assert_eq!(all.len(), 3);

        let limited = store.list_metrics_for_server("srv-1", 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn metrics_retention_pruning() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_metrics(&test_metrics("srv-1", 1000)).unwrap();
        store.put_metrics(&test_metrics("srv-1", 2000)).unwrap();
        store.put_metrics(&test_metrics("srv-2", 1500)).unwrap();

        let pruned = store.delete_metrics_before(1600).unwrap();
        assert_eq!(pruned, 2);

        let remaining = store.list_metrics_for_server("srv-1", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].epoch, 2000);
        assert!(store.list_metrics_for_server("srv-2", 10).unwrap().is_empty());
    }

    #[test]
    fn metrics_prune_nothing_below_cutoff() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_metrics(&test_metrics("srv-1", 5000)).unwrap();

        assert_eq!(store.delete_metrics_before(1000).unwrap(), 0);
        assert_eq!(store.list_metrics_for_server("srv-1", 10).unwrap().len(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_pool_config(&test_pool_config("srv-1")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let record = store.get_pool_config("srv-1").unwrap();
        assert!(record.is_some());
        assert_eq!(record.unwrap().max_size, 10);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_pool_configs().unwrap().is_empty());
        assert!(store.list_sessions_for_server("any").unwrap().is_empty());
        assert!(store.list_metrics_for_server("any", 10).unwrap().is_empty());
        assert!(!store.delete_pool_config("nope").unwrap());
        assert_eq!(store.delete_sessions_for_server("nope").unwrap(), 0);
        assert_eq!(store.delete_metrics_before(u64::MAX).unwrap(), 0);
    }
}
