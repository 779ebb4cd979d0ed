//! Health check probe logic.
//!
//! Probes a session's transport for liveness with a bounded timeout and
//! folds the results into a rolling per-pool health score.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Weight retained by the previous score on each new sample; the
/// complement goes to the newest check, so recent checks dominate.
const SCORE_DECAY: f64 = 0.7;

/// Capability implemented by anything that can answer a liveness ping.
///
/// Backend session transports implement this; the checker never needs to
/// know what the transport actually talks to.
#[async_trait]
pub trait Probe: Send {
    /// Returns `true` if the underlying transport is alive.
    async fn ping(&mut self) -> bool;
}

/// Outcome of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The probe answered within the timeout.
    Healthy,
    /// The probe failed or timed out; the reason is for logs only and
    /// never surfaces to pool callers.
    Unhealthy(String),
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy)
    }
}

/// Performs bounded-time liveness checks against session transports.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    probe_timeout: Duration,
}

impl HealthChecker {
    /// Create a checker with the given per-probe timeout.
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Probe a session transport, bounding the probe by the configured
    /// timeout. A hung probe counts as unhealthy.
    pub async fn check<P: Probe + ?Sized>(&self, probe: &mut P) -> HealthVerdict {
        match tokio::time::timeout(self.probe_timeout, probe.ping()).await {
            Ok(true) => HealthVerdict::Healthy,
            Ok(false) => {
                debug!("health probe failed");
                HealthVerdict::Unhealthy("ping failed".to_string())
            }
            Err(_) => {
                debug!(timeout = ?self.probe_timeout, "health probe timed out");
                HealthVerdict::Unhealthy(format!(
                    "probe timed out after {:?}",
                    self.probe_timeout
                ))
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Rolling fraction of recent health checks that passed, per pool.
///
/// Exponentially weighted: each new sample contributes `1 - SCORE_DECAY`,
/// so a run of failures drags the score toward 0.0 quickly while a single
/// stale failure fades. Starts optimistic at 1.0.
#[derive(Debug, Clone)]
pub struct HealthScore {
    score: f64,
}

impl HealthScore {
    pub fn new() -> Self {
        Self { score: 1.0 }
    }

    /// Fold one check result into the score and return the new value.
    pub fn record(&mut self, passed: bool) -> f64 {
        let sample = if passed { 1.0 } else { 0.0 };
        self.score = (SCORE_DECAY * self.score + (1.0 - SCORE_DECAY) * sample).clamp(0.0, 1.0);
        self.score
    }

    /// Current score in [0.0, 1.0].
    pub fn value(&self) -> f64 {
        self.score
    }
}

impl Default for HealthScore {
    fn default() -> Self {
        Self::new()
    }
}
