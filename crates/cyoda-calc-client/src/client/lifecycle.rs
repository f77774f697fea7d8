//! Binds process lifecycle signals to the session.
//!
//! [`Lifecycle::on_ready`] starts the session and [`Lifecycle::on_shutdown`]
//! drains it. Each transition succeeds at most once per process, however
//! often or concurrently the signals arrive. A start that fails may be retried
//! by the next ready signal.

use crate::client::session::{Session, ShutdownReport};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{Mutex, OnceCell};

pub struct Lifecycle {
    session: Arc<Session>,
    started: Mutex<bool>,
    shutdown: OnceCell<ShutdownReport>,
}

impl Lifecycle {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            started: Mutex::new(false),
            shutdown: OnceCell::new(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Starts the session. Returns `false` once a start has already
    /// succeeded; a failed start leaves the next ready signal free to retry.
    pub async fn on_ready(&self) -> cyoda_calc_core::Result<bool> {
        let mut started = self.started.lock().await;
        if *started {
            tracing::debug!("Ready signal already handled");
            return Ok(false);
        }
        tracing::info!("Application ready, starting session");
        self.session.start().await?;
        *started = true;
        Ok(true)
    }

    /// Shuts the session down once. Every caller receives the same report.
    pub async fn on_shutdown(&self) -> ShutdownReport {
        *self
            .shutdown
            .get_or_init(|| async {
                let report = self.session.shutdown().await;
                if !report.clean {
                    tracing::warn!("Session did not terminate cleanly");
                }
                report
            })
            .await
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
