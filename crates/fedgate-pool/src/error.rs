//! Session pool error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur during pool operations.
///
/// Health check failures and recycle evictions are handled inside the pool
/// (the session is closed and selection retries) and never surface here;
/// a caller only ever sees them indirectly as `AcquireTimeout` or
/// `PoolExhausted` once every candidate is gone.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No session became available within the requested timeout.
    /// Recoverable — the caller may retry or fail the inbound request.
    #[error("timed out after {0:?} waiting for a session")]
    AcquireTimeout(Duration),

    /// Immediate-fail variant for non-blocking acquire when the pool is at
    /// capacity with no idle session.
    #[error("pool at capacity with no idle session available")]
    PoolExhausted,

    /// Acquire attempted after drain began. Not retryable against this
    /// pool instance.
    #[error("pool is draining, no new sessions are handed out")]
    PoolDraining,

    /// Configuration invariant violated at creation/resize time. Fails
    /// fast; pool state is unchanged.
    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    /// The transport factory failed to establish a new session.
    #[error("backend transport error: {0}")]
    Transport(#[from] anyhow::Error),
}
