//! fedgate-state — embedded state store for the fedgate session pool core.
//!
//! Persists per-backend-server pool configuration, session records, and
//! historical pool metrics snapshots. All values are JSON-serialized into
//! redb tables; an in-memory backend is available for tests.
//!
//! The store is the durable side of the pool subsystem: the in-memory pools
//! own the live sessions, while this crate records their configuration and
//! their periodic snapshots for the admin/observability collaborators.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
