//! Idle session allocation strategies.
//!
//! A strategy only *chooses* — it returns an index into the idle set and
//! never mutates pool state. Cursor state uses an atomic so selection is
//! safe under the pool lock without extra synchronization.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::time::Instant;

use fedgate_state::StrategyKind;

/// Snapshot of one idle session, in idle-set order, for ranking.
#[derive(Debug, Clone, Copy)]
pub struct IdleCandidate {
    /// How many times the session has been handed out.
    pub use_count: u64,
    /// When the session entered the idle set.
    pub idle_since: Instant,
}

/// Selection policy over a pool's idle set.
pub trait Strategy: Send + Sync {
    /// The configured kind this strategy implements.
    fn kind(&self) -> StrategyKind;

    /// Choose an index into `candidates`, or `None` if it is empty.
    /// Deterministic given the same candidates and cursor state.
    fn select(&self, candidates: &[IdleCandidate]) -> Option<usize>;
}

/// Build the strategy for a configured kind.
pub fn build(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::RoundRobin => Box::new(RoundRobin::new()),
        StrategyKind::LeastConnections => Box::new(LeastConnections),
    }
}

/// Cycles through idle sessions in insertion order, wrapping.
///
/// The cursor advances on every selection, so a candidate that fails
/// validation is naturally skipped on the retry.
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RoundRobin {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn select(&self, candidates: &[IdleCandidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(idx % candidates.len())
    }
}

/// Prefers the session with the lowest historical use count.
///
/// Idle sessions carry no live connection counter (only one caller ever
/// borrows a session at a time), so use count is the load proxy. Ties go
/// to the session idle the longest, which maximizes reuse fairness.
pub struct LeastConnections;

impl Strategy for LeastConnections {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastConnections
    }

    fn select(&self, candidates: &[IdleCandidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.use_count
                    .cmp(&b.use_count)
                    .then_with(|| a.idle_since.cmp(&b.idle_since))
            })
            .map(|(idx, _)| idx)
    }
}
