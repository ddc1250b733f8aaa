//! Signal handler integration for graceful shutdown.
//!
//! This module saves the latest workflow snapshot on SIGTERM, SIGINT (Unix),
//! or CTRL_C_EVENT (Windows) before the process exits.
//!
//! ```text
//! Signal received (SIGTERM/SIGINT)
//!    │
//!    ▼
//! ShutdownHandler::shutdown()
//!    │
//!    ├─► persist=true: Save WorkflowSnapshot
//!    │
//!    └─► Exit with 130
//! ```
//!
//! The handler does not spawn anything. The binary races
//! [`ShutdownHandler::wait_for_shutdown`] against the orchestration future
//! with `tokio::select!`.

use tracing::{error, info, warn};

use super::persistence::SessionPersistence;
use super::SharedSnapshot;
use crate::error::Result;

/// Exit status after an interrupted run.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Configuration for the shutdown handler.
///
/// # Example
///
/// ```rust
/// use autodev::session::ShutdownHandlerConfig;
///
/// let config = ShutdownHandlerConfig::default();
/// assert!(config.persist);
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownHandlerConfig {
    /// Whether to persist the snapshot on shutdown.
    /// Set to false with `--no-persist`.
    pub persist: bool,
}

impl Default for ShutdownHandlerConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

/// Result of a graceful shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    /// Snapshot was saved successfully.
    StateSaved,
    /// Persistence was disabled, nothing saved.
    PersistenceDisabled,
    /// No snapshot was available to save.
    NoStateToSave,
    /// Save failed but the error was logged.
    SaveFailed(String),
}

/// Saves the workflow snapshot when the process is interrupted.
#[derive(Debug)]
pub struct ShutdownHandler {
    config: ShutdownHandlerConfig,
    persistence: Option<SessionPersistence>,
    snapshot: Option<SharedSnapshot>,
}

impl ShutdownHandler {
    #[must_use]
    pub fn new(config: ShutdownHandlerConfig) -> Self {
        Self {
            config,
            persistence: None,
            snapshot: None,
        }
    }

    /// Attach the persistence layer and the snapshot to save.
    #[must_use]
    pub fn with_persistence(mut self, persistence: SessionPersistence, snapshot: SharedSnapshot) -> Self {
        self.persistence = Some(persistence);
        self.snapshot = Some(snapshot);
        self
    }

    /// Save the snapshot if configured. Never panics or returns an error.
    pub async fn shutdown(&self) -> ShutdownResult {
        if !self.config.persist {
            info!("Graceful shutdown: persistence disabled, skipping save");
            return ShutdownResult::PersistenceDisabled;
        }

        let (Some(persistence), Some(snapshot)) = (&self.persistence, &self.snapshot) else {
            warn!("Graceful shutdown: no snapshot or persistence configured");
            return ShutdownResult::NoStateToSave;
        };

        let mut snapshot = snapshot.lock().await;
        snapshot.touch();

        match persistence.save(&snapshot) {
            Ok(()) => {
                info!(
                    "Graceful shutdown: snapshot saved to {} (state: {})",
                    persistence.session_file_path().display(),
                    snapshot.state
                );
                ShutdownResult::StateSaved
            }
            Err(e) => {
                error!("Graceful shutdown: failed to save snapshot: {}", e);
                ShutdownResult::SaveFailed(e.to_string())
            }
        }
    }

    /// Wait for a shutdown signal, then save the snapshot.
    ///
    /// On Unix this listens for SIGTERM and SIGINT, on Windows for Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handler registration fails.
    pub async fn wait_for_shutdown(&self) -> Result<ShutdownResult> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(self.shutdown().await)
    }

    #[must_use]
    pub fn persist_enabled(&self) -> bool {
        self.config.persist
    }

    #[must_use]
    pub fn has_persistence(&self) -> bool {
        self.persistence.is_some() && self.snapshot.is_some()
    }
}
