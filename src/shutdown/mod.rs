// Package shutdown provides graceful shutdown functionality.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
#[error("graceful shutdown timeout exceeded")]
pub struct TimeoutError;

/// Cancels the root token on SIGINT/SIGTERM and waits for registered tasks.
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_token: CancellationToken,
    timeout: Duration,
    running: Arc<AtomicUsize>,
    finished: Arc<Notify>,
}

impl GracefulShutdown {
    pub fn new(shutdown_token: CancellationToken, timeout: Duration) -> Self {
        Self {
            shutdown_token,
            timeout,
            running: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(Notify::new()),
        }
    }

    /// Registers `n` tasks that will call `done` when they exit.
    pub fn add(&self, n: usize) {
        self.running.fetch_add(n, Ordering::SeqCst);
    }

    pub fn done(&self) {
        let before = self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before <= 1 {
            self.finished.notify_waiters();
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits for an OS signal or cancellation, then for registered tasks.
    pub async fn await_shutdown(&self) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!(component = "graceful-shutdown", event = "os_signal", signal = "SIGINT", "cancellation started");
            }
            _ = terminate() => {
                info!(component = "graceful-shutdown", event = "os_signal", signal = "SIGTERM", "cancellation started");
            }
            _ = self.shutdown_token.cancelled() => {
                info!(component = "graceful-shutdown", event = "ctx_done", "cancellation started");
            }
        }

        self.cancel_and_await_with_timeout().await
    }

    pub async fn cancel_and_await_with_timeout(&self) -> Result<()> {
        self.shutdown_token.cancel();

        match timeout(self.timeout, self.wait_for_completion()).await {
            Ok(()) => {
                info!(component = "graceful-shutdown", event = "shutdown_success", "service was gracefully shut down");
                Ok(())
            }
            Err(_) => {
                warn!(
                    component = "graceful-shutdown",
                    event = "shutdown_timeout",
                    timeout_secs = self.timeout.as_secs(),
                    still_running = self.running(),
                    "not all tasks were closed within timeout"
                );
                Err(TimeoutError.into())
            }
        }
    }

    async fn wait_for_completion(&self) {
        loop {
            let notified = self.finished.notified();
            if self.running() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!(component = "graceful-shutdown", error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
