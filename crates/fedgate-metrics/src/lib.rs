//! fedgate-metrics — observability for fedgate session pools.
//!
//! Tracks per-pool counters (creates, releases, timeouts), acquire
//! wait-time samples, and the rolling health score; produces immutable
//! snapshots persisted to the state store; and renders Prometheus-
//! compatible text exposition for the external exporter collaborator.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record_*() ← fire-and-forget, called from pool operations
//!   ├── update_session_gauges() ← refreshed by the manager's snapshot cycle
//!   └── snapshot() / snapshot_all() → persist PoolMetricsRecord to StateStore
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for a /metrics endpoint
//! ```
//!
//! Recording is in-memory only and can never fail a pool operation.

pub mod collector;
pub mod prometheus;

pub use collector::MetricsCollector;
pub use prometheus::render_prometheus;
