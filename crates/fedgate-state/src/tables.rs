//! redb table definitions for the fedgate state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Composite keys follow the pattern `{server_id}:{child}`; metrics
//! keys zero-pad the epoch so lexicographic order matches time order.

use redb::TableDefinition;

/// Pool configuration records keyed by `{server_id}`.
pub const POOL_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("pool_configs");

/// Session records keyed by `{server_id}:{session_id}`.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Pool metrics snapshots keyed by `{server_id}:{epoch:020}`.
pub const POOL_METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("pool_metrics");
