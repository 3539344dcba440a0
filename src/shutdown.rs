//! Graceful shutdown coordination utilities.
//!
//! A [`ShutdownCoordinator`] is shared between the signal handler, the fetch loop, the
//! retry and rate-limit sleeps and the authorization wait, so an interrupt is observed at
//! the next batch boundary or sleep without corrupting checkpoints or half-written files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        // Register interest before checking the flag so a request between the
        // check and the await is not missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `true` when the full duration elapsed, `false` when interrupted.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: Option<&SharedShutdown>) -> bool {
    match shutdown {
        Some(shutdown) => {
            if shutdown.is_shutdown_requested() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(duration) => true,
                _ = shutdown.wait_for_shutdown() => false,
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            true
        }
    }
}

/// Spawn a task that requests shutdown on Ctrl+C, or SIGTERM on unix.
pub fn install_signal_handlers(shutdown: SharedShutdown) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Interrupt received - saving progress...");
        shutdown.request_shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
