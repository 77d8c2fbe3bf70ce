//! Connection admission and graceful shutdown.
//!
//! Upgraded WebSocket tasks are detached from the HTTP server, so waiting
//! for `axum::serve` alone would return while sessions are still closing.
//! Every upgraded connection therefore holds a [`ConnectionGuard`], and
//! shutdown waits for the last guard to drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for tasks and connections before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared cancellation plus live-connection accounting.
///
/// Session tasks observe the token and close their transports with 1001,
/// notifying their paired peer first; their guards drop as they return.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    live: AtomicUsize,
    idle: Notify,
}

/// One admitted connection. Dropping it releases the slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.coordinator.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.coordinator.idle.notify_waiters();
        }
    }
}

impl ShutdownCoordinator {
    /// A coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutting down. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Connections currently admitted.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Admit one connection unless shutting down or `max` are already live.
    pub fn admit(self: &Arc<Self>, max: usize) -> Option<ConnectionGuard> {
        if self.is_shutting_down() {
            return None;
        }
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(ConnectionGuard {
            coordinator: Arc::clone(self),
        })
    }

    /// Resolve once no connection is admitted.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking, or a drop in between would be missed.
            let _ = notified.as_mut().enable();
            if self.connection_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Cancel, then wait up to `timeout` for `handles` to finish and every
    /// admitted connection to close.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(
            task_count = handles.len(),
            connections = self.connection_count(),
            timeout_secs = timeout.as_secs(),
            "draining"
        );
        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.wait_idle().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                connections = self.connection_count(),
                "shutdown timed out after {timeout:?}"
            );
        } else {
            debug!("all connections closed");
        }
    }
}
