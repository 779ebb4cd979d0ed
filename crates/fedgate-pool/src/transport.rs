//! Backend session transport seam.
//!
//! The pool never knows what a session actually talks to — stdio child,
//! websocket, SSE stream. It only needs to establish sessions, ping them,
//! and close them, so those three capabilities are the whole interface.

use async_trait::async_trait;

use fedgate_health::Probe;

/// One live transport to a backend server.
///
/// A session answers liveness pings (via the [`Probe`] supertrait) and can
/// be closed. `close` must be idempotent; the pool may call it on sessions
/// that already lost their connection.
#[async_trait]
pub trait BackendSession: Probe + Send {
    /// Close the underlying transport.
    async fn close(&mut self);
}

/// Factory for establishing new backend sessions — injected for
/// testability.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Establish a new session to the given backend server.
    async fn connect(&self, server_id: &str) -> anyhow::Result<Box<dyn BackendSession>>;
}
