//! fedgate-manager — process-wide registry of session pools.
//!
//! Maps backend-server ids to `SessionPool`s, merges per-server
//! configuration over process defaults, and owns the background loops
//! that keep pools healthy: idle cleanup, health sweep, and the metrics
//! snapshot cycle.
//!
//! # Architecture
//!
//! ```text
//! PoolManager
//!   ├── pools: RwLock<HashMap<server_id, Arc<SessionPool>>>
//!   ├── get_or_create_pool() ← lazy, per-server config merged over defaults
//!   ├── apply_override() ← admin surface: persist + live resize/evict
//!   └── background loops (independent timers, watch-channel shutdown)
//!       ├── cleanup loop   → sweep_expired() on every pool
//!       ├── health loop    → health_sweep() on every pool
//!       └── snapshot cycle → gauges, snapshots, session records, pruning
//! ```
//!
//! The registry is the only process-wide mutable state; everything that
//! needs pool access takes the manager by reference rather than going
//! through an ambient singleton.

pub mod config;
pub mod error;
pub mod manager;

pub use config::{ManagerConfig, PoolOverride};
pub use error::{ManagerError, ManagerResult};
pub use manager::PoolManager;
