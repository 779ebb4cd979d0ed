//! Pool manager error types.

use thiserror::Error;

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur during pool manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("pooling is not enabled for server: {0}")]
    PoolingDisabled(String),

    #[error("pool error: {0}")]
    Pool(#[from] fedgate_pool::PoolError),

    #[error("state store error: {0}")]
    State(#[from] fedgate_state::StateError),
}
