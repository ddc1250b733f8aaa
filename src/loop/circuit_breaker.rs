//! Circuit breaker around agent invocations.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────> Open
//!     ▲                                │ recovery timeout elapsed
//!     │ half_open_max_calls successes  ▼
//!     └──────────────────────────── HalfOpen ──any failure──> Open
//! ```
//!
//! The breaker is consulted once per command, before the first attempt, and
//! every attempt's outcome is recorded. A command that starts while the
//! breaker is open is rejected without invoking the agent.

use crate::config::{secs, CircuitBreakerSettings};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// # Errors
    ///
    /// Returns a `Config` error for a negative or non-finite recovery timeout.
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Result<Self> {
        Ok(Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: secs(
                "circuit_breaker.recovery_timeout_secs",
                settings.recovery_timeout_secs,
            )?,
            half_open_max_calls: settings.half_open_max_calls,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether a call may proceed at `now`. An open breaker whose recovery
    /// timeout has elapsed moves to half-open and lets the call through.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self.last_failure.map_or(true, |at| {
                    now.saturating_duration_since(at) >= self.config.recovery_timeout
                });
                if cooled {
                    info!("Circuit breaker entering half-open state");
                    self.state = CircuitState::HalfOpen;
                    self.half_open_successes = 0;
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.half_open_max_calls {
                    info!("Circuit breaker closed");
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                }
            }
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);

        let trips = match self.state {
            CircuitState::Closed => self.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trips {
            warn!(
                "Circuit breaker opened after {} failures",
                self.failure_count
            );
            self.state = CircuitState::Open;
        }
    }
}
