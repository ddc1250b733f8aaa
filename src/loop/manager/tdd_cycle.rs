//! Per-task TDD cycle for `LoopManager`.
//!
//! `clear -> continue -> validate -> (correct -> validate)* -> update`

use super::LoopManager;
use crate::analytics::WorkflowEvent;
use crate::error::Result;
use crate::r#loop::state::{AgentStatus, OrchestrationState, WorkflowCommand};
use colored::Colorize;
use tracing::{info, warn};

impl LoopManager {
    /// Work `task` until it validates or is abandoned.
    pub(crate) async fn run_tdd_cycle(&mut self, task: &str) -> Result<OrchestrationState> {
        println!("{} {}", "▶ Task:".bright_cyan().bold(), task);

        self.execute(WorkflowCommand::Clear).await?;
        self.execute(WorkflowCommand::Continue).await?;

        loop {
            match self.execute_with_status(WorkflowCommand::Validate).await? {
                Some(AgentStatus::ValidationPassed) => break,
                Some(AgentStatus::ValidationFailed) => info!("Validation failed for '{}'", task),
                other => warn!(
                    "Expected a validation status for '{}', got {:?}; treating as failed",
                    task, other
                ),
            }

            self.execute(WorkflowCommand::Correct).await?;
            let within_limit = self.tracker.increment_fix_attempts(task);
            self.sync_snapshot().await;
            if !within_limit {
                self.abandon(task);
                return self.next_task_state();
            }
        }

        let status = self.execute_with_status(WorkflowCommand::Update).await?;
        self.tracker.reset_fix_attempts(task);
        self.state.record_task_completed();
        println!("{} {}", "✓ Completed:".bright_green(), task);

        match status {
            Some(AgentStatus::ProjectComplete) => Ok(OrchestrationState::ProjectCompleteCheck),
            Some(AgentStatus::ProjectIncomplete) => self.next_task_state(),
            other => {
                warn!(
                    "Expected a project status after {}, got {:?}; consulting the task list",
                    WorkflowCommand::Update,
                    other
                );
                self.next_task_state()
            }
        }
    }

    fn abandon(&mut self, task: &str) {
        let attempts = self.tracker.fix_attempts(task);
        println!(
            "{} {} ({} fix attempts)",
            "✗ Abandoned:".yellow().bold(),
            task,
            attempts
        );
        self.observer.record(&WorkflowEvent::TaskAbandoned {
            task: task.to_string(),
            attempts,
        });
        self.state.record_task_abandoned(task);
    }
}
