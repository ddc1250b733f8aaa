//! Orchestration state types and transitions.
//!
//! This module defines the states of the two-phase workflow, the agent
//! commands it issues, and the statuses the agent reports back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A state of the orchestration state machine.
///
/// # Example
///
/// ```
/// use autodev::r#loop::state::OrchestrationState;
///
/// let state = OrchestrationState::TddCycle { task: "Write parser".to_string() };
/// assert_eq!(state.to_string(), "tdd_cycle");
/// assert!(!state.is_terminal());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestrationState {
    /// Implement, validate and correct one task
    TddCycle { task: String },
    /// Every task is done; confirm before refactoring
    ProjectCompleteCheck,
    /// Check in the work and ask whether refactoring is needed
    RefactorCheckin,
    /// Apply the requested refactoring
    RefactorApply,
    /// Terminal
    Done,
}

impl OrchestrationState {
    /// Short snake_case label used in logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::TddCycle { .. } => "tdd_cycle",
            Self::ProjectCompleteCheck => "project_complete_check",
            Self::RefactorCheckin => "refactor_checkin",
            Self::RefactorApply => "refactor_apply",
            Self::Done => "done",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The task being worked on, if any.
    #[must_use]
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::TddCycle { task } => Some(task),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Commands issued to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCommand {
    Clear,
    Continue,
    Validate,
    Update,
    Correct,
    Checkin,
    Refactor,
    Finalize,
}

impl WorkflowCommand {
    /// The slash command passed after `-p`.
    ///
    /// # Example
    ///
    /// ```
    /// use autodev::r#loop::state::WorkflowCommand;
    ///
    /// assert_eq!(WorkflowCommand::Validate.as_str(), "/validate");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "/clear",
            Self::Continue => "/continue",
            Self::Validate => "/validate",
            Self::Update => "/update",
            Self::Correct => "/correct",
            Self::Checkin => "/checkin",
            Self::Refactor => "/refactor",
            Self::Finalize => "/finalize",
        }
    }
}

impl std::fmt::Display for WorkflowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses the agent reports through status files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    ValidationPassed,
    ValidationFailed,
    ProjectComplete,
    ProjectIncomplete,
    RefactoringNeeded,
    NoRefactoringNeeded,
}

impl AgentStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationPassed => "validation_passed",
            Self::ValidationFailed => "validation_failed",
            Self::ProjectComplete => "project_complete",
            Self::ProjectIncomplete => "project_incomplete",
            Self::RefactoringNeeded => "refactoring_needed",
            Self::NoRefactoringNeeded => "no_refactoring_needed",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that is not one of the known [`AgentStatus`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown agent status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AgentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "validation_passed" => Ok(Self::ValidationPassed),
            "validation_failed" => Ok(Self::ValidationFailed),
            "project_complete" => Ok(Self::ProjectComplete),
            "project_incomplete" => Ok(Self::ProjectIncomplete),
            "refactoring_needed" => Ok(Self::RefactoringNeeded),
            "no_refactoring_needed" => Ok(Self::NoRefactoringNeeded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Progress of one orchestration run.
///
/// # Example
///
/// ```
/// use autodev::r#loop::state::{LoopState, OrchestrationState};
///
/// let state = LoopState::new();
/// assert_eq!(state.commands_run, 0);
/// assert_eq!(state.current, OrchestrationState::ProjectCompleteCheck);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    /// Current state of the machine
    pub current: OrchestrationState,
    /// Agent commands issued so far
    pub commands_run: u32,
    /// Tasks that passed validation
    pub tasks_completed: u32,
    /// Tasks given up on after too many fix attempts
    pub tasks_abandoned: Vec<String>,
    /// Rounds of `/finalize`
    pub refactor_rounds: u32,
    /// Unique session identifier
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

impl LoopState {
    /// Create a fresh run state. The machine starts at
    /// [`OrchestrationState::ProjectCompleteCheck`] until the first task is
    /// picked.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: OrchestrationState::ProjectCompleteCheck,
            commands_run: 0,
            tasks_completed: 0,
            tasks_abandoned: Vec::new(),
            refactor_rounds: 0,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: OrchestrationState) -> OrchestrationState {
        std::mem::replace(&mut self.current, next)
    }

    pub fn record_command(&mut self) {
        self.commands_run += 1;
    }

    pub fn record_task_completed(&mut self) {
        self.tasks_completed += 1;
    }

    pub fn record_task_abandoned(&mut self, task: &str) {
        self.tasks_abandoned.push(task.to_string());
    }

    pub fn record_refactor_round(&mut self) {
        self.refactor_rounds += 1;
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}
