//! Pooled session — one reusable transport handle with pool metadata.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use fedgate_state::{SessionId, SessionRecord, SessionState};

use crate::transport::BackendSession;

/// A single pooled session with the metadata the pool needs to manage it.
///
/// Exclusively owned: the pool holds it while `Idle`/`Validating`, exactly
/// one caller holds it while `Active`. Moving it by value between pool and
/// caller makes double-release and cross-caller sharing unrepresentable.
pub struct PooledSession {
    id: SessionId,
    server_id: String,
    state: SessionState,
    created: Instant,
    created_epoch: u64,
    last_used: Instant,
    last_used_epoch: u64,
    use_count: u64,
    healthy: bool,
    last_health_check_epoch: Option<u64>,
    transport: Box<dyn BackendSession>,
}

impl PooledSession {
    /// Wrap a freshly connected transport. Starts `Idle` with zero uses.
    pub(crate) fn new(id: SessionId, server_id: &str, transport: Box<dyn BackendSession>) -> Self {
        let now = Instant::now();
        let epoch = epoch_secs();
        Self {
            id,
            server_id: server_id.to_string(),
            state: SessionState::Idle,
            created: now,
            created_epoch: epoch,
            last_used: now,
            last_used_epoch: epoch,
            use_count: 0,
            healthy: true,
            last_health_check_epoch: None,
            transport,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Instant of the last acquire/release (insertion into the idle set).
    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Whether the session is past the recycle age. `None` disables
    /// age-based retirement.
    pub(crate) fn is_expired(&self, recycle_after: Option<Duration>) -> bool {
        match recycle_after {
            Some(max_age) => self.age() > max_age,
            None => false,
        }
    }

    /// Flag the session unusable so the pool discards it on release.
    ///
    /// Callers use this when the backend errored mid-request.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Transition to `Active` for a new borrower.
    pub(crate) fn mark_acquired(&mut self) {
        self.state = SessionState::Active;
        self.last_used = Instant::now();
        self.last_used_epoch = epoch_secs();
        self.use_count += 1;
    }

    /// Transition back to `Idle` after a release.
    pub(crate) fn mark_released(&mut self) {
        self.state = SessionState::Idle;
        self.last_used = Instant::now();
        self.last_used_epoch = epoch_secs();
    }

    /// Record a health check outcome.
    pub(crate) fn record_health(&mut self, passed: bool) {
        self.healthy = passed;
        self.last_health_check_epoch = Some(epoch_secs());
    }

    /// Mutable access to the transport for probing.
    pub(crate) fn transport_mut(&mut self) -> &mut dyn BackendSession {
        self.transport.as_mut()
    }

    /// Close the underlying transport and mark the session `Closed`.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        self.transport.close().await;
    }

    /// Persistable projection of this session's metadata.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            server_id: self.server_id.clone(),
            state: self.state,
            created_at: self.created_epoch,
            last_used_at: self.last_used_epoch,
            use_count: self.use_count,
            last_health_check_at: self.last_health_check_epoch,
            last_health_ok: self.healthy,
        }
    }

}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("state", &self.state)
            .field("use_count", &self.use_count)
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
