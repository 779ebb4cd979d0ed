//! fedgate-pool — per-backend session pooling for the fedgate gateway.
//!
//! Each backend server gets one `SessionPool` owning a bounded set of
//! reusable sessions. Idle sessions are handed out by a pluggable
//! allocation strategy, validated for liveness on demand, recycled past a
//! maximum age, and returned without leaking.
//!
//! # Architecture
//!
//! ```text
//! SessionPool
//!   ├── acquire() → idle candidate via Strategy (pre-ping optional)
//!   │              or new session via TransportFactory (under max_size)
//!   │              or bounded wait for a release
//!   ├── release() → back to idle, or closed (unhealthy / expired / over cap)
//!   ├── drain() / resize() / warm_up()
//!   └── sweep_expired() / health_sweep() ← driven by the manager's loops
//! ```
//!
//! The pool's mutable state lives behind a single mutex; probe and connect
//! I/O always happen with the lock released.

pub mod config;
pub mod error;
pub mod pool;
pub mod session;
pub mod strategy;
pub mod transport;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use pool::{PoolStats, SessionPool};
pub use session::PooledSession;
pub use strategy::{IdleCandidate, Strategy};
pub use transport::{BackendSession, TransportFactory};
