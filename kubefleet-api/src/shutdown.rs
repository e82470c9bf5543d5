//! Graceful shutdown handling
//!
//! Signal handling (SIGTERM, SIGINT, SIGQUIT), connection draining through
//! axum, and cancellation of background tasks such as the reconciler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    is_shutting_down: Arc<AtomicBool>,
    /// How long background tasks get to stop
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with default 30s timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            shutdown_tx,
            shutdown_rx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initiate graceful shutdown
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for a termination signal from the OS, then initiate shutdown.
    ///
    /// Fails only when the signal handlers cannot be installed.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigquit = signal(SignalKind::quit())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigquit.recv() => info!("Received SIGQUIT"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C");
        }

        self.shutdown();
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Future resolving once shutdown has been initiated, for
    /// `axum::serve(..).with_graceful_shutdown`
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();

        async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Manages graceful shutdown of background tasks
#[derive(Default)]
pub struct TaskShutdown {
    tasks: Vec<(&'static str, tokio::task::JoinHandle<()>)>,
}

impl TaskShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a background task for shutdown
    pub fn register(&mut self, name: &'static str, handle: tokio::task::JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Abort all registered tasks and wait up to `timeout` for each
    pub async fn abort_all(&mut self, timeout: Duration) {
        info!("Stopping {} background tasks...", self.tasks.len());

        for (name, handle) in self.tasks.drain(..) {
            handle.abort();

            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!("Task '{}' stopped gracefully", name),
                Ok(Err(e)) if e.is_cancelled() => info!("Task '{}' cancelled", name),
                Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                Err(_) => warn!("Task '{}' did not stop within timeout", name),
            }
        }
    }
}
