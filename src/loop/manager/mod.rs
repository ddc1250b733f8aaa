//! Orchestration state machine.
//!
//! This module drives the agent through a task list in two phases: a TDD
//! cycle per task, then a project-wide refactor cycle.
//!
//! # Architecture
//!
//! The `LoopManager` is the central orchestrator that:
//! 1. Picks the next incomplete task from the [`TaskTracker`]
//! 2. Issues workflow commands through the [`CommandExecutor`]
//! 3. Reads the status the agent reports after `validate`, `update` and `refactor`
//! 4. Abandons tasks that exhaust their fix attempts
//!
//! ```text
//! TddCycle(task) ──project_complete──> ProjectCompleteCheck ──> RefactorCheckin
//!   ▲    │                                                      │      ▲
//!   └────┘ project_incomplete                 refactoring_needed│      │
//!                                                               ▼      │
//!                                  Done <──no_refactoring── RefactorApply
//! ```
//!
//! # Dependency Injection
//!
//! The loop manager takes its collaborators through `LoopDependencies`,
//! enabling unit testing with mocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use autodev::r#loop::manager::{LoopManager, LoopManagerConfig};
//! use autodev::config::WorkflowConfig;
//!
//! let config = LoopManagerConfig::new(project_dir.clone(), WorkflowConfig::load(&project_dir)?);
//! let mut manager = LoopManager::new(config, observer)?;
//! let final_state = manager.run().await?;
//! ```

mod refactor_cycle;
mod tdd_cycle;

use super::circuit_breaker::CircuitBreakerConfig;
use super::executor::CommandExecutor;
use super::operations::{ClaudeCli, TokioSleeper};
use super::retry::RetryConfig;
use super::signal::SignalWaiter;
use super::state::{AgentStatus, LoopState, OrchestrationState, WorkflowCommand};
use super::status::StatusFileReader;
use super::task_tracker::TaskTracker;
use super::usage_limit::UsageLimitResolver;
use crate::analytics::{Observer, WorkflowEvent};
use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::session::{SharedSnapshot, WorkflowSnapshot};
use crate::testing::{AgentProcess, Sleeper, StatusSource};
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dependencies for the `LoopManager`.
///
/// # Example
///
/// ```rust,ignore
/// use autodev::r#loop::manager::LoopDependencies;
/// use autodev::testing::{MockAgentProcess, RecordingSleeper, ScriptedStatusSource, RecordingObserver};
/// use std::sync::Arc;
///
/// let deps = LoopDependencies {
///     agent: Arc::new(MockAgentProcess::new().with_marker(marker)),
///     sleeper: Arc::new(RecordingSleeper::new()),
///     status: Arc::new(ScriptedStatusSource::with_statuses(["validation_passed"])),
///     observer: Arc::new(RecordingObserver::new()),
/// };
/// ```
pub struct LoopDependencies {
    /// Agent subprocess.
    pub agent: Arc<dyn AgentProcess>,
    /// Backoff and usage-limit waits.
    pub sleeper: Arc<dyn Sleeper>,
    /// Where the agent's reported statuses come from.
    pub status: Arc<dyn StatusSource>,
    pub observer: Arc<dyn Observer>,
}

impl std::fmt::Debug for LoopDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopDependencies")
            .field("agent", &"<dyn AgentProcess>")
            .field("sleeper", &"<dyn Sleeper>")
            .field("status", &"<dyn StatusSource>")
            .field("observer", &"<dyn Observer>")
            .finish()
    }
}

impl LoopDependencies {
    /// Create real dependencies for production use.
    #[must_use]
    pub fn real(project_dir: &Path, workflow: &WorkflowConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            agent: Arc::new(ClaudeCli::new(project_dir.to_path_buf())),
            sleeper: Arc::new(TokioSleeper),
            status: Arc::new(StatusFileReader::new(project_dir.join(&workflow.status_dir))),
            observer,
        }
    }
}

/// Configuration for creating a new `LoopManager`.
#[derive(Debug, Clone)]
pub struct LoopManagerConfig {
    /// Path to the project directory.
    pub project_dir: PathBuf,
    /// Workflow settings, already merged with CLI overrides.
    pub workflow: WorkflowConfig,
    /// Session identifier to use instead of a fresh one.
    pub session_id: Option<String>,
}

impl LoopManagerConfig {
    #[must_use]
    pub fn new(project_dir: PathBuf, workflow: WorkflowConfig) -> Self {
        Self {
            project_dir,
            workflow,
            session_id: None,
        }
    }

    /// Use a session identifier chosen by the caller, so other observers
    /// can be tagged with it before the manager exists.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Drives the agent from the first open task to a finished refactor cycle.
pub struct LoopManager {
    project_dir: PathBuf,
    executor: CommandExecutor,
    tracker: TaskTracker,
    status: Arc<dyn StatusSource>,
    observer: Arc<dyn Observer>,
    state: LoopState,
    snapshot: SharedSnapshot,
}

impl std::fmt::Debug for LoopManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopManager")
            .field("project_dir", &self.project_dir)
            .field("executor", &self.executor)
            .field("tracker", &self.tracker)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LoopManager {
    /// Create a manager wired to the real agent CLI, status files and timer.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the workflow settings are invalid.
    pub fn new(config: LoopManagerConfig, observer: Arc<dyn Observer>) -> Result<Self> {
        let deps = LoopDependencies::real(&config.project_dir, &config.workflow, observer);
        Self::with_deps(config, deps)
    }

    /// Create a manager with injected dependencies.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the workflow settings are invalid.
    pub fn with_deps(config: LoopManagerConfig, deps: LoopDependencies) -> Result<Self> {
        let LoopManagerConfig {
            project_dir,
            workflow,
            session_id,
        } = config;
        workflow.validate()?;

        let waiter = SignalWaiter::from_settings(&project_dir, &workflow.signal)?;
        let executor = CommandExecutor::new(deps.agent, deps.sleeper, deps.observer.clone(), waiter)
            .with_program(workflow.program.clone())
            .with_retry(RetryConfig::from_settings(&workflow.retry)?)
            .with_circuit_breaker(CircuitBreakerConfig::from_settings(&workflow.circuit_breaker)?)
            .with_resolver(UsageLimitResolver::new(workflow.min_wait_time));
        let tracker = TaskTracker::new(project_dir.join(&workflow.plan_file), workflow.max_fix_attempts);

        let mut state = LoopState::new();
        if let Some(session_id) = session_id {
            state.session_id = session_id;
        }
        let snapshot = WorkflowSnapshot::new(state.session_id.clone()).shared();

        Ok(Self {
            project_dir,
            executor,
            tracker,
            status: deps.status,
            observer: deps.observer,
            state,
            snapshot,
        })
    }

    /// Handle to the snapshot kept current while running, for the shutdown
    /// handler.
    #[must_use]
    pub fn snapshot_handle(&self) -> SharedSnapshot {
        self.snapshot.clone()
    }

    #[must_use]
    pub fn state(&self) -> &LoopState {
        &self.state
    }

    #[must_use]
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Run the state machine until it reaches `Done`.
    ///
    /// # Errors
    ///
    /// Any error the executor cannot recover from aborts the run and is
    /// returned as is. Reading the task list can also fail with an IO error.
    pub async fn run(&mut self) -> Result<LoopState> {
        self.print_banner();

        let first = self.next_task_state()?;
        self.record_transition("start", first).await;

        while !self.state.current.is_terminal() {
            let next = self.step().await?;
            let from = self.state.current.label();
            self.record_transition(from, next).await;
        }

        self.print_summary();
        Ok(self.state.clone())
    }

    /// Execute the current state and decide the next one.
    async fn step(&mut self) -> Result<OrchestrationState> {
        match self.state.current.clone() {
            OrchestrationState::TddCycle { task } => self.run_tdd_cycle(&task).await,
            OrchestrationState::ProjectCompleteCheck => self.confirm_completion(),
            OrchestrationState::RefactorCheckin => self.run_refactor_checkin().await,
            OrchestrationState::RefactorApply => self.run_refactor_apply().await,
            OrchestrationState::Done => Ok(OrchestrationState::Done),
        }
    }

    async fn record_transition(&mut self, from: &str, next: OrchestrationState) {
        debug!("Transition {} -> {}", from, next);
        self.observer.record(&WorkflowEvent::StateTransition {
            from: from.to_string(),
            to: next.label().to_string(),
        });
        self.state.transition(next);
        self.sync_snapshot().await;
    }

    pub(crate) async fn sync_snapshot(&self) {
        let attempts = self.tracker.attempts_snapshot();
        self.snapshot.lock().await.update(&self.state, attempts);
    }

    /// Issue one workflow command and return the agent's JSON output.
    pub(crate) async fn execute(&mut self, command: WorkflowCommand) -> Result<Value> {
        self.state.record_command();
        self.executor.run(command.as_str(), &[]).await
    }

    /// Issue a command, then take the status the agent reported for it.
    ///
    /// A missing or unrecognised status is logged and returned as `None`.
    pub(crate) async fn execute_with_status(
        &mut self,
        command: WorkflowCommand,
    ) -> Result<Option<AgentStatus>> {
        self.execute(command).await?;

        let Some(raw) = self.status.take_latest() else {
            warn!("No status reported after {}", command);
            return Ok(None);
        };
        match raw.parse::<AgentStatus>() {
            Ok(status) => {
                info!("{} reported {}", command, status);
                Ok(Some(status))
            }
            Err(e) => {
                warn!("Ignoring status after {}: {}", command, e);
                Ok(None)
            }
        }
    }

    /// TDD cycle for the next open task, or the completion check when none
    /// is left.
    pub(crate) fn next_task_state(&mut self) -> Result<OrchestrationState> {
        Ok(match self.tracker.get_next_task()? {
            Some(task) => OrchestrationState::TddCycle { task },
            None => {
                info!("No open tasks left in {}", self.tracker.plan_path().display());
                OrchestrationState::ProjectCompleteCheck
            }
        })
    }

    fn confirm_completion(&mut self) -> Result<OrchestrationState> {
        let counts = self.tracker.counts()?;
        let abandoned = self.tracker.abandoned_tasks();
        info!(
            "Task list: {} complete, {} incomplete",
            counts.complete, counts.incomplete
        );
        if !abandoned.is_empty() {
            warn!(
                "{} task(s) were abandoned: {}",
                abandoned.len(),
                abandoned.join(", ")
            );
        }
        println!(
            "{} {} of {} tasks complete, starting refactor cycle",
            "✓".bright_green(),
            counts.complete,
            counts.total()
        );
        Ok(OrchestrationState::RefactorCheckin)
    }

    fn print_banner(&mut self) {
        println!("{}", "=".repeat(60).bright_blue());
        println!(
            "{}",
            "     AUTODEV - Agent Workflow Orchestrator".bright_blue().bold()
        );
        println!("{}", "=".repeat(60).bright_blue());
        println!();
        println!("   Project: {}", self.project_dir.display());
        println!("   Task list: {}", self.tracker.plan_path().display());
        println!("   Max fix attempts: {}", self.tracker.max_fix_attempts());
        match self.tracker.counts() {
            Ok(counts) if counts.total() > 0 => println!(
                "   Tasks: {} total, {} complete, {} remaining",
                counts.total(),
                counts.complete,
                counts.incomplete
            ),
            Ok(_) => println!("   Tasks: none found"),
            Err(e) => warn!("Could not count tasks: {}", e),
        }
        println!("   Session: {}", self.state.session_id);
        println!();
    }

    fn print_summary(&self) {
        println!();
        println!("{}", "=".repeat(60).bright_green());
        println!("{}", "     Workflow complete".bright_green().bold());
        println!("{}", "=".repeat(60).bright_green());
        println!("   Commands run: {}", self.state.commands_run);
        println!("   Tasks completed: {}", self.state.tasks_completed);
        println!("   Refactor rounds: {}", self.state.refactor_rounds);
        if !self.state.tasks_abandoned.is_empty() {
            println!(
                "   {} {}",
                "Abandoned:".yellow(),
                self.state.tasks_abandoned.join(", ")
            );
        }
    }
}
