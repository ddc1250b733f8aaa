//! Running one agent command to completion.
//!
//! Each attempt:
//!
//! ```text
//! invoke ──spawn error──> Execution (retryable)
//!   │
//!   ├─ "usage limit" in output? ── sleep until reset ── wait marker ── invoke again
//!   │
//! wait marker ──timeout──> CommandTimeout (retryable)
//!   │
//! parse stdout as JSON ──fail──> Parse (permanent)
//! ```
//!
//! Attempts are driven by the [`RetryScheduler`]. A usage-limit wait happens
//! inside a single attempt and does not consume retry budget.

use super::circuit_breaker::CircuitBreakerConfig;
use super::retry::{RetryConfig, RetryScheduler};
use super::signal::SignalWaiter;
use super::usage_limit::UsageLimitResolver;
use crate::analytics::{Observer, WorkflowEvent};
use crate::error::{AutodevError, Result};
use crate::testing::{AgentOutput, AgentProcess, Sleeper};
use chrono::Utc;
use colored::Colorize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Flags placed after `-p <command>` on every invocation.
pub const OUTPUT_FLAGS: [&str; 3] = [
    "--output-format",
    "json",
    "--dangerously-skip-permissions",
];

/// Build the argv for one invocation.
#[must_use]
pub fn build_argv(program: &str, command: &str, args: &[String]) -> Vec<String> {
    let mut argv = Vec::with_capacity(3 + OUTPUT_FLAGS.len() + args.len());
    argv.push(program.to_string());
    argv.push("-p".to_string());
    argv.push(command.to_string());
    argv.extend(OUTPUT_FLAGS.iter().map(|flag| (*flag).to_string()));
    argv.extend(args.iter().cloned());
    argv
}

/// Executes agent commands with marker waits, usage-limit handling and
/// retries.
pub struct CommandExecutor {
    agent: Arc<dyn AgentProcess>,
    sleeper: Arc<dyn Sleeper>,
    observer: Arc<dyn Observer>,
    scheduler: RetryScheduler,
    waiter: SignalWaiter,
    resolver: UsageLimitResolver,
    program: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("program", &self.program)
            .field("marker", &self.waiter.marker())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    /// Create an executor invoking `claude` with the default retry policy.
    pub fn new(
        agent: Arc<dyn AgentProcess>,
        sleeper: Arc<dyn Sleeper>,
        observer: Arc<dyn Observer>,
        waiter: SignalWaiter,
    ) -> Self {
        let scheduler = RetryScheduler::new(sleeper.clone(), observer.clone());
        Self {
            agent,
            sleeper,
            observer,
            scheduler,
            waiter,
            resolver: UsageLimitResolver::default(),
            program: "claude".to_string(),
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.scheduler = self.scheduler.with_circuit_breaker(config);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: UsageLimitResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run `command` under the executor's retry policy.
    ///
    /// # Errors
    ///
    /// See [`run_with`](Self::run_with).
    pub async fn run(&self, command: &str, args: &[String]) -> Result<Value> {
        self.run_with(command, args, &self.retry).await
    }

    /// Run `command` with extra trailing `args` and return the agent's JSON
    /// output.
    ///
    /// # Errors
    ///
    /// Returns `Parse` or `Validation` errors immediately. Execution and
    /// timeout failures are returned once the retry budget is spent.
    pub async fn run_with(&self, command: &str, args: &[String], retry: &RetryConfig) -> Result<Value> {
        let argv = build_argv(&self.program, command, args);
        info!("Executing command: {}", command);
        debug!("Full argv: {:?}", argv);
        self.observer.record(&WorkflowEvent::CommandStarted {
            command: command.to_string(),
        });

        let start = Instant::now();
        let result = self
            .scheduler
            .execute(retry, command, |_| self.attempt(command, &argv))
            .await;
        let duration_ms = millis(start.elapsed());

        match result {
            Ok((value, attempts)) => {
                info!("Command {} completed", command);
                self.observer.record(&WorkflowEvent::CommandCompleted {
                    command: command.to_string(),
                    duration_ms,
                    attempts,
                });
                Ok(value)
            }
            Err(e) => {
                error!("[{}] {}", e.kind(), e);
                self.observer.record(&WorkflowEvent::CommandFailed {
                    command: command.to_string(),
                    kind: e.kind().to_string(),
                    duration_ms,
                });
                Err(e)
            }
        }
    }

    async fn attempt(&self, command: &str, argv: &[String]) -> Result<Value> {
        self.waiter.cleanup();
        let result = self.attempt_inner(command, argv).await;
        if result.is_err() {
            self.waiter.cleanup();
        }
        result
    }

    async fn attempt_inner(&self, command: &str, argv: &[String]) -> Result<Value> {
        let mut output = self.invoke(command, argv).await?;

        let combined = output.combined();
        if self.resolver.detect(&combined) {
            output = self.wait_out_usage_limit(command, argv, &combined).await?;
        }

        let elapsed = self
            .waiter
            .wait()
            .await
            .map_err(|e| e.with_command(command))?;
        self.observer.record(&WorkflowEvent::MarkerDetected {
            elapsed_ms: millis(elapsed),
        });

        serde_json::from_str(&output.stdout).map_err(|e| {
            AutodevError::parse(command, format!("Failed to parse agent JSON output: {e}"))
        })
    }

    async fn invoke(&self, command: &str, argv: &[String]) -> Result<AgentOutput> {
        let output = self.agent.invoke(argv).await.map_err(|e| {
            AutodevError::execution(command, format!("Failed to execute agent command: {e:#}"))
        })?;
        if output.exit_code != Some(0) {
            debug!("{} exited with {:?}", command, output.exit_code);
        }
        Ok(output)
    }

    async fn wait_out_usage_limit(
        &self,
        command: &str,
        argv: &[String],
        combined: &str,
    ) -> Result<AgentOutput> {
        let info = self.resolver.parse(combined);
        debug!("Parsed usage limit info: {:?}", info);
        let seconds = self
            .resolver
            .wait_seconds(&info, Utc::now())
            .map_err(|e| e.with_command(command))?;

        warn!("Usage limit detected for {}", command);
        println!(
            "{}",
            format!("Usage limit reached. Waiting {seconds} seconds for reset...").yellow()
        );
        self.observer.record(&WorkflowEvent::UsageLimitWait {
            command: command.to_string(),
            seconds,
        });
        self.sleeper.sleep(Duration::from_secs(seconds)).await;

        // The limited invocation still fires its Stop hook.
        self.waiter
            .wait()
            .await
            .map_err(|e| e.with_command(command))?;

        info!("Retrying {} after usage limit wait", command);
        self.invoke(command, argv).await
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
