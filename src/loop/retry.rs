//! Retry with exponential backoff and jitter.
//!
//! # Architecture
//!
//! ```text
//! operation(attempt) ──Err──> kind() ∈ retryable? ──no──> return error
//!        ▲                          │
//!        │                         yes
//!        │                          ▼
//!        └──── sleep(delay) <── attempts left? ──no──> RetriesExhausted
//! ```
//!
//! The delay before retry `n` (0-indexed) is `base_delay * 2^n`, capped at
//! `max_delay`, plus uniform jitter of up to `jitter_factor` of that delay in
//! either direction.
//!
//! Every scheduler owns a [`CircuitBreaker`]. A command started while the
//! breaker is open fails with an `Execution` error before the first attempt.
//!
//! # Example
//!
//! ```rust,ignore
//! use autodev::r#loop::retry::{RetryConfig, RetryScheduler};
//!
//! let scheduler = RetryScheduler::new(sleeper, observer);
//! let (value, attempts) = scheduler
//!     .execute(&RetryConfig::default(), "/validate", |attempt| run_once(attempt))
//!     .await?;
//! ```

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::analytics::{Observer, WorkflowEvent};
use crate::config::{secs, RetrySettings};
use crate::error::{AutodevError, ErrorKind, Result};
use crate::testing::Sleeper;
use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry policy for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Fraction of the delay used as jitter, in [0, 1).
    pub jitter_factor: f64,
    /// Error kinds worth retrying. Parse and validation errors are never
    /// retried, even if listed.
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
            retryable: [ErrorKind::Execution, ErrorKind::Timeout]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Build a policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for delays that are negative or not finite.
    pub fn from_settings(settings: &RetrySettings) -> Result<Self> {
        Ok(Self {
            max_retries: settings.max_retries,
            base_delay: secs("retry.base_delay_secs", settings.base_delay_secs)?,
            max_delay: secs("retry.max_delay_secs", settings.max_delay_secs)?,
            jitter_factor: settings.jitter_factor,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the jitter fraction. Negative or NaN values disable jitter and
    /// values of 1 or more are capped just below 1.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = if jitter_factor > 0.0 {
            jitter_factor.min(0.99)
        } else {
            0.0
        };
        self
    }

    /// Whether `error` should be retried under this policy.
    #[must_use]
    pub fn is_retryable(&self, error: &AutodevError) -> bool {
        !error.is_permanent() && self.retryable.contains(&error.kind())
    }
}

/// Delay before retry number `attempt` (0-indexed).
pub fn compute_delay<R: Rng + ?Sized>(config: &RetryConfig, attempt: u32, rng: &mut R) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.base_delay.as_secs_f64() * 2f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let spread = capped * config.jitter_factor;
    let jittered = if spread > 0.0 && spread.is_finite() {
        capped + rng.gen_range(-spread..=spread)
    } else {
        capped
    };

    Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(config.max_delay)
}

/// Runs operations under a [`RetryConfig`].
///
/// Clones share one circuit breaker.
#[derive(Clone)]
pub struct RetryScheduler {
    sleeper: Arc<dyn Sleeper>,
    observer: Arc<dyn Observer>,
    breaker: Arc<Mutex<CircuitBreaker>>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler").finish_non_exhaustive()
    }
}

impl RetryScheduler {
    pub fn new(sleeper: Arc<dyn Sleeper>, observer: Arc<dyn Observer>) -> Self {
        Self {
            sleeper,
            observer,
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                CircuitBreakerConfig::default(),
            ))),
        }
    }

    /// Replace the circuit breaker with a fresh one using `config`.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Arc::new(Mutex::new(CircuitBreaker::new(config)));
        self
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker().state()
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget runs out.
    ///
    /// `operation` receives the 0-indexed attempt number. On success returns
    /// the value and the number of attempts made.
    ///
    /// # Errors
    ///
    /// Returns an `Execution` error without calling `operation` while the
    /// circuit breaker is open. A non-retryable error is returned as is,
    /// without sleeping. When every
    /// attempt fails with a retryable error the last one is returned wrapped
    /// in [`AutodevError::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        config: &RetryConfig,
        command: &str,
        mut operation: F,
    ) -> Result<(T, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.breaker().allow(Instant::now()) {
            warn!("Circuit breaker is open, rejecting {}", command);
            return Err(AutodevError::execution(
                command,
                "Circuit breaker is open, rejecting call",
            ));
        }

        let mut attempt = 0;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => {
                    self.breaker().record_success();
                    return Ok((value, attempt + 1));
                }
                Err(e) => e,
            };
            self.breaker().record_failure(Instant::now());

            if !config.is_retryable(&error) {
                debug!("{} failed with non-retryable {} error", command, error.kind());
                return Err(error);
            }

            if attempt >= config.max_retries {
                warn!(
                    "{} failed after {} retries: {}",
                    command, config.max_retries, error
                );
                return Err(AutodevError::RetriesExhausted {
                    retries: config.max_retries,
                    source: Box::new(error),
                });
            }

            let delay = compute_delay(config, attempt, &mut rand::thread_rng());
            warn!(
                "{} attempt {} failed ({}), retrying in {:.1}s",
                command,
                attempt + 1,
                error,
                delay.as_secs_f64()
            );
            self.observer.record(&WorkflowEvent::RetryScheduled {
                command: command.to_string(),
                attempt: attempt + 1,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::NoopObserver;
    use crate::testing::{RecordingObserver, RecordingSleeper};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> AutodevError {
        AutodevError::execution("/continue", "spawn failed")
    }

    fn scheduler(sleeper: Arc<RecordingSleeper>) -> RetryScheduler {
        RetryScheduler::new(sleeper, Arc::new(NoopObserver))
    }

    #[test]
    fn test_compute_delay_doubles_without_jitter() {
        let config = RetryConfig::default().with_jitter(0.0);
        let mut rng = rand::thread_rng();
        assert_eq!(compute_delay(&config, 0, &mut rng), Duration::from_secs(1));
        assert_eq!(compute_delay(&config, 1, &mut rng), Duration::from_secs(2));
        assert_eq!(compute_delay(&config, 3, &mut rng), Duration::from_secs(8));
    }

    #[test]
    fn test_compute_delay_is_capped() {
        let config = RetryConfig::default().with_jitter(0.0);
        let mut rng = rand::thread_rng();
        assert_eq!(compute_delay(&config, 10, &mut rng), Duration::from_secs(60));
        assert_eq!(compute_delay(&config, u32::MAX, &mut rng), Duration::from_secs(60));
    }

    #[test]
    fn test_compute_delay_jitter_stays_in_band() {
        let config = RetryConfig::default().with_jitter(0.5);
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let delay = compute_delay(&config, 2, &mut rng).as_secs_f64();
            assert!((2.0..=6.0).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn test_negative_jitter_is_disabled() {
        let config = RetryConfig::default().with_jitter(-0.5);
        assert_eq!(config.jitter_factor, 0.0);
        assert!(RetryConfig::default().with_jitter(3.0).jitter_factor < 1.0);

        let mut raw = RetryConfig::default();
        raw.jitter_factor = -0.5;
        let mut rng = rand::thread_rng();
        assert_eq!(compute_delay(&raw, 1, &mut rng), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_errors_never_retryable() {
        let mut config = RetryConfig::default();
        config.retryable.insert(ErrorKind::Parse);
        assert!(!config.is_retryable(&AutodevError::parse("/update", "bad json")));
        assert!(config.is_retryable(&transient()));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default().with_jitter(0.0);

        let (value, attempts) = scheduler(sleeper.clone())
            .execute(&config, "/continue", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            sleeper.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = AtomicU32::new(0);

        let result: Result<((), u32)> = scheduler(sleeper.clone())
            .execute(&RetryConfig::default(), "/validate", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AutodevError::parse("/validate", "not json")) }
            })
            .await;

        assert!(matches!(result, Err(AutodevError::Parse { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let config = RetryConfig::default().with_jitter(0.0).with_max_retries(2);

        let result: Result<((), u32)> = scheduler(sleeper.clone())
            .execute(&config, "/continue", |attempt| async move {
                Err(AutodevError::Timeout {
                    marker: PathBuf::from("m"),
                    elapsed: Duration::from_secs(u64::from(attempt)),
                })
            })
            .await;

        let err = result.unwrap_err();
        match &err {
            AutodevError::RetriesExhausted { retries, source } => {
                assert_eq!(*retries, 2);
                assert!(matches!(
                    source.as_ref(),
                    AutodevError::Timeout { elapsed, .. } if *elapsed == Duration::from_secs(2)
                ));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(err.is_timeout());
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_events_are_recorded() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let observer = Arc::new(RecordingObserver::new());
        let scheduler = RetryScheduler::new(sleeper, observer.clone());
        let calls = AtomicU32::new(0);

        scheduler
            .execute(&RetryConfig::default().with_jitter(0.0), "/update", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(transient())
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(
            observer.events(),
            vec![WorkflowEvent::RetryScheduled {
                command: "/update".to_string(),
                attempt: 1,
                delay_ms: 1000,
            }]
        );
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_calling() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let scheduler = scheduler(sleeper.clone()).with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(3600),
            half_open_max_calls: 1,
        });
        let config = RetryConfig::default().with_jitter(0.0).with_max_retries(1);

        let first: Result<((), u32)> = scheduler
            .execute(&config, "/continue", |_| async { Err(transient()) })
            .await;
        assert!(matches!(first, Err(AutodevError::RetriesExhausted { .. })));
        assert_eq!(scheduler.circuit_state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let second: Result<((), u32)> = scheduler
            .execute(&config, "/validate", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        let err = second.unwrap_err();
        assert!(matches!(err, AutodevError::Execution { ref command, .. } if command == "/validate"));
        assert!(err.to_string().contains("Circuit breaker is open"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_breaker_recovers_through_half_open() {
        let scheduler = scheduler(Arc::new(RecordingSleeper::new())).with_circuit_breaker(
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::ZERO,
                half_open_max_calls: 2,
            },
        );
        let config = RetryConfig::default().with_max_retries(0);

        let _ = scheduler
            .execute(&config, "/clear", |_| async { Err::<(), _>(transient()) })
            .await;
        assert_eq!(scheduler.circuit_state(), CircuitState::Open);

        scheduler
            .execute(&config, "/clear", |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(scheduler.circuit_state(), CircuitState::HalfOpen);

        scheduler
            .execute(&config, "/clear", |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(scheduler.circuit_state(), CircuitState::Closed);
    }

    #[test]
    fn test_from_settings() {
        let config = RetryConfig::from_settings(&RetrySettings::default()).unwrap();
        assert_eq!(config, RetryConfig::default());
    }
}
