//! Graceful shutdown.
//!
//! One process-wide [`CancellationToken`] drives the whole sequence:
//!
//! 1. SIGINT/SIGTERM (or [`ShutdownCoordinator::trigger`]) cancels the token
//! 2. the consume loop sees it and returns
//! 3. the gRPC server stops accepting, and in-flight handlers, which hold child
//!    tokens, get `CANCELLED`
//! 4. [`ShutdownCoordinator::drain`] waits for the consume loop and then
//!    for the worker pool to finish its queue, bounded by `timeout`
//!
//! ## Environment Variables
//!
//! - `SHUTDOWN_TIMEOUT_SECS`: how long to wait for the drain (default: 30)

use std::time::Duration;

use iocvault_ingest::IngestSummary;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pool::WorkerPool;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Received SIGINT (Ctrl+C)
    SigInt,
    /// Received SIGTERM
    SigTerm,
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigInt => write!(f, "SIGINT (Ctrl+C)"),
            Self::SigTerm => write!(f, "SIGTERM"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Completes when SIGINT or SIGTERM arrives.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::SigInt
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
        ShutdownSignal::SigTerm
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

/// Owns the process token and the drain deadline.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for an OS signal or a manual trigger, then cancel the token.
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        let signal = tokio::select! {
            signal = shutdown_signal() => signal,
            _ = self.token.cancelled() => ShutdownSignal::Manual,
        };
        info!(signal = %signal, "Shutdown requested");
        self.token.cancel();
        signal
    }

    /// Wait for the consume loop to return and the pool to drain.
    ///
    /// Returns `false` if `timeout` expired first; the remaining work is
    /// abandoned.
    pub async fn drain(&self, pool: &WorkerPool, ingest: Option<JoinHandle<IngestSummary>>) -> bool {
        self.token.cancel();

        let sequence = async {
            if let Some(ingest) = ingest {
                match ingest.await {
                    Ok(summary) => info!(
                        batches = summary.batches_dispatched,
                        records = summary.records_dispatched,
                        "Consume loop finished"
                    ),
                    Err(e) => error!(error = %e, "Consume loop task failed"),
                }
            }
            pool.shutdown().await;
        };

        match tokio::time::timeout(self.timeout, sequence).await {
            Ok(()) => {
                info!("Shutdown complete");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    active = pool.active_tasks(),
                    queued = pool.queued_tasks(),
                    "Shutdown timed out, abandoning remaining tasks"
                );
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}
