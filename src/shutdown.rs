//! Graceful shutdown support.
//!
//! The server stops accepting connections on SIGTERM/SIGINT (or any custom
//! trigger), lets in-flight requests finish, and then waits a bounded time for
//! background usage-report sends to complete.
//!
//! # Example
//!
//! ```rust,no_run
//! use graphql_plugin_kit::shutdown::{run_with_graceful_shutdown, ShutdownConfig, ShutdownCoordinator};
//! use axum::Router;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = Router::new();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!
//! run_with_graceful_shutdown(listener, app, ShutdownCoordinator::new(ShutdownConfig::default())).await?;
//! # Ok(())
//! # }
//! ```

use crate::usage_reporting::UsageReporting;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Configuration for graceful shutdown behavior.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for pending usage reports (default: 10 seconds)
    pub timeout: Duration,
    /// Whether to handle OS signals (SIGTERM, SIGINT) automatically (default: true)
    pub handle_signals: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            handle_signals: true,
        }
    }
}

/// Current state of the shutdown process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Server is running normally
    Running,
    /// Shutdown initiated, draining connections and reports
    Draining,
    /// Shutdown complete
    Shutdown,
}

/// Shutdown coordinator that manages the graceful shutdown process.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Signal to stop accepting new connections
    shutdown_tx: broadcast::Sender<()>,
    state_tx: Arc<watch::Sender<ShutdownState>>,
    state_rx: watch::Receiver<ShutdownState>,
    is_shutting_down: Arc<AtomicBool>,
    reporting: Option<UsageReporting>,
    config: ShutdownConfig,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (state_tx, state_rx) = watch::channel(ShutdownState::Running);

        Self {
            shutdown_tx,
            state_tx: Arc::new(state_tx),
            state_rx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            reporting: None,
            config,
        }
    }

    /// Flush this plugin's pending reports during shutdown.
    pub fn with_usage_reporting(mut self, reporting: UsageReporting) -> Self {
        self.reporting = Some(reporting);
        self
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Watch the shutdown state.
    pub fn watch_state(&self) -> watch::Receiver<ShutdownState> {
        self.state_rx.clone()
    }

    /// Stop accepting connections. Idempotent.
    pub fn trigger(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }
        info!("Initiating graceful shutdown...");
        let _ = self.state_tx.send(ShutdownState::Draining);
        let _ = self.shutdown_tx.send(());
    }

    /// Wait (up to the configured timeout) for pending usage reports, then
    /// mark shutdown complete.
    pub async fn drain(&self) {
        self.trigger();
        if let Some(reporting) = &self.reporting {
            let pending = reporting.pending();
            if !reporting.flush_timeout(self.config.timeout).await {
                warn!(
                    pending,
                    timeout_secs = self.config.timeout.as_secs(),
                    "Shutdown timeout reached with usage reports still in flight"
                );
            }
        }
        let _ = self.state_tx.send(ShutdownState::Shutdown);
        info!("Graceful shutdown complete");
    }

    /// Create a future that completes when shutdown is signaled.
    ///
    /// This is useful for passing to `axum::serve().with_graceful_shutdown()`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        let already = self.is_shutting_down();
        async move {
            if !already {
                let _ = rx.recv().await;
            }
        }
    }
}

/// Create a future that completes on SIGTERM or SIGINT (Ctrl+C).
#[cfg(unix)]
pub async fn signal_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to install signal handlers; falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT (Ctrl+C)");
        }
    }
}

/// Create a future that completes on Ctrl+C.
#[cfg(not(unix))]
pub async fn signal_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C");
}

/// Run a server until the coordinator is triggered, then drain.
///
/// With `handle_signals` set, OS signals trigger the coordinator.
pub async fn run_with_graceful_shutdown(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    coordinator: ShutdownCoordinator,
) -> std::io::Result<()> {
    if coordinator.config().handle_signals {
        let coordinator_for_signal = coordinator.clone();
        tokio::spawn(async move {
            signal_shutdown().await;
            coordinator_for_signal.trigger();
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.shutdown_signal())
        .await?;

    coordinator.drain().await;
    Ok(())
}
