//! Completion marker polling.
//!
//! The agent's Stop hook touches a marker file when it finishes. A
//! [`SignalWaiter`] polls for that file with exponential backoff and deletes it
//! once seen, so every invocation waits on a fresh marker.

use crate::config::{secs, SignalSettings};
use crate::error::{AutodevError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Waits for the completion marker to appear.
#[derive(Debug, Clone)]
pub struct SignalWaiter {
    marker: PathBuf,
    timeout: Duration,
    min_interval: Duration,
    max_interval: Duration,
}

impl SignalWaiter {
    /// Create a waiter for `marker` with the default timings
    /// (30s timeout, 0.1s initial interval, 2s interval cap).
    #[must_use]
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
            timeout: Duration::from_secs(30),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
        }
    }

    /// Build a waiter from configuration, resolving the marker against
    /// `project_dir`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if a duration is negative or not finite.
    pub fn from_settings(project_dir: &Path, settings: &SignalSettings) -> Result<Self> {
        Ok(Self {
            marker: project_dir.join(&settings.marker),
            timeout: secs("signal.timeout_secs", settings.timeout_secs)?,
            min_interval: secs("signal.min_interval_secs", settings.min_interval_secs)?,
            max_interval: secs("signal.max_interval_secs", settings.max_interval_secs)?,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval range. `max` is raised to `min` if lower.
    #[must_use]
    pub fn with_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = min;
        self.max_interval = max.max(min);
        self
    }

    /// Path of the marker being watched.
    #[must_use]
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the marker exists, then delete it.
    ///
    /// The marker is checked at least once, even with a zero timeout. Returns
    /// the time spent waiting.
    ///
    /// # Errors
    ///
    /// Returns [`AutodevError::Timeout`] carrying the marker path and the
    /// elapsed time when the marker does not show up within the timeout.
    pub async fn wait(&self) -> Result<Duration> {
        let start = Instant::now();
        let mut interval = self.min_interval;

        loop {
            if self.marker.exists() {
                let elapsed = start.elapsed();
                debug!(
                    "Completion marker {} appeared after {:?}",
                    self.marker.display(),
                    elapsed
                );
                self.cleanup();
                return Ok(elapsed);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(AutodevError::Timeout {
                    marker: self.marker.clone(),
                    elapsed,
                });
            }

            // Never sleep past the deadline by more than one check.
            let remaining = self.timeout - elapsed;
            tokio::time::sleep(interval.min(remaining)).await;
            interval = (interval * 2).min(self.max_interval);
        }
    }

    /// Remove the marker if present. Failures are logged, never returned.
    pub fn cleanup(&self) {
        match std::fs::remove_file(&self.marker) {
            Ok(()) => debug!("Removed completion marker {}", self.marker.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove completion marker {}: {}",
                self.marker.display(),
                e
            ),
        }
    }
}
