//! fedgate-health — session liveness checking for fedgate pools.
//!
//! Provides the bounded-time liveness probe used both inline during
//! acquire (pre-ping) and by the manager's periodic health sweep, plus the
//! per-pool rolling health score.
//!
//! # Architecture
//!
//! ```text
//! HealthChecker
//!   ├── check(probe) → HealthVerdict (probe bounded by timeout)
//!   └── Probe — capability implemented by backend session transports
//!
//! HealthScore
//!   └── record(passed) → exponentially-weighted pass fraction [0.0, 1.0]
//! ```
//!
//! A session that fails a check is closed by its pool and never handed
//! out; the verdict itself never reaches pool callers.

pub mod checker;

pub use checker::{HealthChecker, HealthScore, HealthVerdict, Probe};
