//! Session pool — bounded, strategy-driven reuse of backend sessions.
//!
//! All mutable pool state sits behind one mutex; callers blocked at
//! capacity park on a `Notify` woken by every release. Probe and connect
//! I/O always run with the lock released: a candidate is first removed
//! from the idle set (marked `Validating`), probed, and only then either
//! handed out or closed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fedgate_health::HealthChecker;
use fedgate_metrics::MetricsCollector;
use fedgate_state::{SessionId, SessionRecord, SessionState};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::session::PooledSession;
use crate::strategy::{self, IdleCandidate, Strategy};
use crate::transport::TransportFactory;

/// Pool-level statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions sitting in the idle set.
    pub idle: usize,
    /// Sessions borrowed by callers.
    pub active: usize,
    /// Sessions removed from the idle set for an in-flight health probe.
    pub validating: usize,
    /// Reserved slots for in-flight connects.
    pub connecting: usize,
    /// idle + active + validating + connecting.
    pub total: usize,
    pub min_size: u32,
    pub max_size: u32,
    pub draining: bool,
}

/// Mutable pool state, guarded by a single mutex.
struct PoolState {
    config: PoolConfig,
    strategy: Box<dyn Strategy>,
    /// Idle sessions in insertion order (releases append at the back).
    idle: VecDeque<PooledSession>,
    /// Sessions currently borrowed by callers.
    active: usize,
    /// Sessions taken out of the idle set for a probe in flight.
    validating: usize,
    /// Slots reserved for connects in flight.
    connecting: usize,
    /// Once set, no new sessions are handed out.
    draining: bool,
    /// Next session id to allocate (monotonically increasing).
    next_id: SessionId,
}

impl PoolState {
    /// Every session slot the pool currently accounts for.
    fn total(&self) -> usize {
        self.idle.len() + self.active + self.validating + self.connecting
    }

    fn allocate_id(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn candidates(&self) -> Vec<IdleCandidate> {
        self.idle
            .iter()
            .map(|s| IdleCandidate {
                use_count: s.use_count(),
                idle_since: s.last_used(),
            })
            .collect()
    }
}

/// One acquire step decided under the pool lock, executed outside it.
enum Decision {
    /// A viable idle session, already marked `Active`.
    Ready(PooledSession),
    /// Candidate past recycle age; close it and retry selection.
    Recycle(PooledSession),
    /// Candidate needs a pre-ping before hand-out.
    Validate(PooledSession),
    /// Capacity available; a slot is reserved for this connect.
    Connect { id: SessionId },
    /// At capacity with no viable idle candidate.
    Full,
}

/// Manages the sessions for one backend server.
pub struct SessionPool {
    server_id: String,
    factory: Arc<dyn TransportFactory>,
    checker: HealthChecker,
    metrics: Arc<MetricsCollector>,
    state: Mutex<PoolState>,
    /// Wakes capacity waiters; `notify_one` per freed slot, `notify_waiters`
    /// on drain/resize.
    capacity: Notify,
}

impl SessionPool {
    /// Create a new pool. Fails fast on invalid configuration.
    pub fn new(
        server_id: impl Into<String>,
        config: PoolConfig,
        factory: Arc<dyn TransportFactory>,
        checker: HealthChecker,
        metrics: Arc<MetricsCollector>,
    ) -> PoolResult<Self> {
        config.validate()?;
        let strategy = strategy::build(config.strategy);
        Ok(Self {
            server_id: server_id.into(),
            factory,
            checker,
            metrics,
            state: Mutex::new(PoolState {
                config,
                strategy,
                idle: VecDeque::new(),
                active: 0,
                validating: 0,
                connecting: 0,
                draining: false,
                next_id: 1,
            }),
            capacity: Notify::new(),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Current configuration snapshot.
    pub async fn config(&self) -> PoolConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn is_draining(&self) -> bool {
        self.state.lock().await.draining
    }

    /// Current pool statistics.
    pub async fn stats(&self) -> PoolStats {
        let st = self.state.lock().await;
        PoolStats {
            idle: st.idle.len(),
            active: st.active,
            validating: st.validating,
            connecting: st.connecting,
            total: st.total(),
            min_size: st.config.min_size,
            max_size: st.config.max_size,
            draining: st.draining,
        }
    }

    /// Persistable metadata for the sessions currently in the idle set.
    /// Borrowed sessions are recorded when they come back.
    pub async fn session_records(&self) -> Vec<SessionRecord> {
        let st = self.state.lock().await;
        st.idle.iter().map(|s| s.to_record()).collect()
    }

    // ── Acquire / release ──────────────────────────────────────────

    /// Acquire a session, waiting up to the configured timeout.
    pub async fn acquire(&self) -> PoolResult<PooledSession> {
        let timeout = { self.state.lock().await.config.acquire_timeout };
        self.acquire_with_timeout(timeout).await
    }

    /// Acquire a session, waiting up to `timeout` for capacity.
    ///
    /// The timeout must be positive. On elapse the acquire fails with
    /// `AcquireTimeout`; the caller may retry or fail its inbound request.
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> PoolResult<PooledSession> {
        if timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "acquire timeout must be positive".to_string(),
            ));
        }

        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if let Some(session) = self.try_candidate().await? {
                self.metrics
                    .record_wait(&self.server_id, started.elapsed())
                    .await;
                return Ok(session);
            }

            // At capacity. Park until a release frees a slot or the
            // deadline passes. The Notify permit is registered before we
            // sleep, so a release between the capacity check and here is
            // not lost.
            let notified = self.capacity.notified();
            tokio::pin!(notified);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    self.metrics.record_timeout(&self.server_id).await;
                    debug!(server_id = %self.server_id, ?timeout, "acquire timed out at capacity");
                    return Err(PoolError::AcquireTimeout(timeout));
                }
            }
            if Instant::now() >= deadline {
                self.metrics.record_timeout(&self.server_id).await;
                return Err(PoolError::AcquireTimeout(timeout));
            }
        }
    }

    /// Non-blocking acquire: fails immediately with `PoolExhausted` when
    /// the pool is at capacity with no viable idle candidate.
    pub async fn try_acquire(&self) -> PoolResult<PooledSession> {
        match self.try_candidate().await? {
            Some(session) => {
                self.metrics
                    .record_wait(&self.server_id, Duration::ZERO)
                    .await;
                Ok(session)
            }
            None => Err(PoolError::PoolExhausted),
        }
    }

    /// One selection pass: hand out an idle session, create a new one
    /// under capacity, or report `None` when full. Non-viable candidates
    /// (expired, failed pre-ping) are closed and selection retries without
    /// re-entering the blocking wait.
    async fn try_candidate(&self) -> PoolResult<Option<PooledSession>> {
        loop {
            let decision = {
                let mut st = self.state.lock().await;
                if st.draining {
                    return Err(PoolError::PoolDraining);
                }
                let candidates = st.candidates();
                match st.strategy.select(&candidates) {
                    Some(idx) => {
                        let mut session =
                            st.idle.remove(idx).expect("selected index within idle set");
                        let recycle = st.config.recycle_after();
                        if session.is_expired(recycle) {
                            session.set_state(SessionState::Recycling);
                            Decision::Recycle(session)
                        } else if st.config.pre_ping {
                            session.set_state(SessionState::Validating);
                            st.validating += 1;
                            Decision::Validate(session)
                        } else {
                            session.mark_acquired();
                            st.active += 1;
                            Decision::Ready(session)
                        }
                    }
                    None => {
                        if st.total() < st.config.max_size as usize {
                            st.connecting += 1;
                            Decision::Connect {
                                id: st.allocate_id(),
                            }
                        } else {
                            Decision::Full
                        }
                    }
                }
            };

            match decision {
                Decision::Ready(session) => {
                    debug!(
                        server_id = %self.server_id,
                        session_id = session.id(),
                        use_count = session.use_count(),
                        "acquired idle session"
                    );
                    return Ok(Some(session));
                }
                Decision::Recycle(session) => {
                    info!(
                        server_id = %self.server_id,
                        session_id = session.id(),
                        age = ?session.age(),
                        "recycling session past max age"
                    );
                    self.close_session(session).await;
                    self.capacity.notify_one();
                }
                Decision::Validate(mut session) => {
                    let verdict = self.checker.check(session.transport_mut()).await;
                    let passed = verdict.is_healthy();
                    session.record_health(passed);
                    self.metrics.record_health(&self.server_id, passed).await;

                    if passed {
                        let mut st = self.state.lock().await;
                        st.validating -= 1;
                        if st.draining {
                            drop(st);
                            self.close_session(session).await;
                            return Err(PoolError::PoolDraining);
                        }
                        session.mark_acquired();
                        st.active += 1;
                        drop(st);
                        debug!(
                            server_id = %self.server_id,
                            session_id = session.id(),
                            "acquired idle session after pre-ping"
                        );
                        return Ok(Some(session));
                    }

                    warn!(
                        server_id = %self.server_id,
                        session_id = session.id(),
                        "session failed pre-ping, discarding"
                    );
                    {
                        let mut st = self.state.lock().await;
                        st.validating -= 1;
                    }
                    self.close_session(session).await;
                    self.capacity.notify_one();
                }
                Decision::Connect { id } => match self.factory.connect(&self.server_id).await {
                    Ok(transport) => {
                        let mut session = PooledSession::new(id, &self.server_id, transport);
                        self.metrics.record_create(&self.server_id).await;

                        let mut st = self.state.lock().await;
                        st.connecting -= 1;
                        if st.draining {
                            drop(st);
                            self.close_session(session).await;
                            return Err(PoolError::PoolDraining);
                        }
                        session.mark_acquired();
                        st.active += 1;
                        drop(st);
                        debug!(
                            server_id = %self.server_id,
                            session_id = id,
                            "created new session"
                        );
                        return Ok(Some(session));
                    }
                    Err(e) => {
                        {
                            let mut st = self.state.lock().await;
                            st.connecting -= 1;
                        }
                        self.capacity.notify_one();
                        warn!(server_id = %self.server_id, error = %e, "session connect failed");
                        return Err(PoolError::Transport(e));
                    }
                },
                Decision::Full => return Ok(None),
            }
        }
    }

    /// Return a session to the pool.
    ///
    /// Healthy, under recycle age, not draining, not over capacity: back
    /// to the idle set. Anything else: closed and discarded. Either way a
    /// waiter is woken.
    pub async fn release(&self, mut session: PooledSession) {
        self.metrics.record_release(&self.server_id).await;

        let mut st = self.state.lock().await;
        st.active = st.active.saturating_sub(1);
        let recycle = st.config.recycle_after();
        let keep = !st.draining
            && session.is_healthy()
            && !session.is_expired(recycle)
            && st.total() < st.config.max_size as usize;

        if keep {
            let session_id = session.id();
            session.mark_released();
            st.idle.push_back(session);
            drop(st);
            debug!(
                server_id = %self.server_id,
                session_id,
                "session returned to idle set"
            );
        } else {
            drop(st);
            debug!(
                server_id = %self.server_id,
                session_id = session.id(),
                "session closed on release"
            );
            self.close_session(session).await;
        }

        self.capacity.notify_one();
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Pre-warm the pool to `min_size` idle sessions (never beyond
    /// `max_size`). Stops at the first connect failure.
    pub async fn warm_up(&self) -> PoolResult<()> {
        let mut warmed = 0u32;
        loop {
            let id = {
                let mut st = self.state.lock().await;
                if st.draining
                    || st.total() >= st.config.min_size as usize
                    || st.total() >= st.config.max_size as usize
                {
                    break;
                }
                st.connecting += 1;
                st.allocate_id()
            };

            match self.factory.connect(&self.server_id).await {
                Ok(transport) => {
                    let session = PooledSession::new(id, &self.server_id, transport);
                    self.metrics.record_create(&self.server_id).await;
                    let mut st = self.state.lock().await;
                    st.connecting -= 1;
                    st.idle.push_back(session);
                    warmed += 1;
                }
                Err(e) => {
                    let mut st = self.state.lock().await;
                    st.connecting -= 1;
                    drop(st);
                    return Err(PoolError::Transport(e));
                }
            }
        }

        if warmed > 0 {
            info!(server_id = %self.server_id, warmed, "session pool warmed");
        }
        Ok(())
    }

    /// Drain the pool: reject new acquires, close every idle session, and
    /// wake all waiters (they fail with `PoolDraining`). Borrowed sessions
    /// are closed as they come back through `release`.
    pub async fn drain(&self) {
        let drained: Vec<PooledSession> = {
            let mut st = self.state.lock().await;
            st.draining = true;
            st.idle.drain(..).collect()
        };

        let closed = drained.len();
        for session in drained {
            self.close_session(session).await;
        }
        self.capacity.notify_waiters();
        info!(server_id = %self.server_id, closed, "pool draining started");
    }

    /// Atomically swap the pool configuration.
    ///
    /// Shrinking `max_size` closes excess idle sessions immediately
    /// (longest-idle first); borrowed sessions are never force-closed —
    /// they retire on release while the pool is over capacity.
    pub async fn resize(&self, new_config: PoolConfig) -> PoolResult<()> {
        new_config.validate()?;

        let excess: Vec<PooledSession> = {
            let mut st = self.state.lock().await;
            if st.strategy.kind() != new_config.strategy {
                st.strategy = strategy::build(new_config.strategy);
            }
            st.config = new_config;

            let max = st.config.max_size as usize;
            let mut excess = Vec::new();
            while st.total() > max {
                match st.idle.pop_front() {
                    Some(session) => excess.push(session),
                    None => break,
                }
            }
            excess
        };

        let closed = excess.len();
        for session in excess {
            self.close_session(session).await;
        }
        if closed > 0 {
            info!(server_id = %self.server_id, closed, "closed excess idle sessions after resize");
        }
        // Wake waiters so they observe the new capacity.
        self.capacity.notify_waiters();
        Ok(())
    }

    // ── Sweeps (driven by the manager's background loops) ──────────

    /// Close idle sessions past the recycle age. Returns how many were
    /// closed. No-op when recycling is disabled.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<PooledSession> = {
            let mut st = self.state.lock().await;
            let Some(recycle) = st.config.recycle_after() else {
                return 0;
            };
            let mut keep = VecDeque::with_capacity(st.idle.len());
            let mut out = Vec::new();
            while let Some(mut session) = st.idle.pop_front() {
                if session.is_expired(Some(recycle)) {
                    session.set_state(SessionState::Recycling);
                    out.push(session);
                } else {
                    keep.push_back(session);
                }
            }
            st.idle = keep;
            out
        };

        let closed = expired.len();
        for session in expired {
            self.close_session(session).await;
        }
        for _ in 0..closed {
            self.capacity.notify_one();
        }
        if closed > 0 {
            debug!(server_id = %self.server_id, closed, "recycled idle sessions past max age");
        }
        closed
    }

    /// Health-check the idle set. Candidates are removed from the idle set
    /// under the lock, probed with the lock released, and survivors put
    /// back; failures are closed. Returns (checked, closed).
    pub async fn health_sweep(&self) -> (usize, usize) {
        let candidates: Vec<PooledSession> = {
            let mut st = self.state.lock().await;
            if st.draining {
                return (0, 0);
            }
            let taken: Vec<PooledSession> = st
                .idle
                .drain(..)
                .map(|mut s| {
                    s.set_state(SessionState::Validating);
                    s
                })
                .collect();
            st.validating += taken.len();
            taken
        };

        let checked = candidates.len();
        let mut healthy = Vec::new();
        let mut failed = Vec::new();
        for mut session in candidates {
            let verdict = self.checker.check(session.transport_mut()).await;
            let passed = verdict.is_healthy();
            session.record_health(passed);
            self.metrics.record_health(&self.server_id, passed).await;
            if passed {
                healthy.push(session);
            } else {
                failed.push(session);
            }
        }

        {
            let mut st = self.state.lock().await;
            st.validating -= checked;
            if st.draining {
                // Drain won while we probed; nothing goes back.
                failed.append(&mut healthy);
            } else {
                for mut session in healthy {
                    session.set_state(SessionState::Idle);
                    st.idle.push_back(session);
                }
            }
        }

        let closed = failed.len();
        for session in failed {
            self.close_session(session).await;
        }
        for _ in 0..closed {
            self.capacity.notify_one();
        }
        if closed > 0 {
            warn!(server_id = %self.server_id, checked, closed, "health sweep closed unhealthy sessions");
        }
        (checked, closed)
    }

    /// Close a session's transport. Never called with the state lock held.
    async fn close_session(&self, mut session: PooledSession) {
        session.close().await;
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}
