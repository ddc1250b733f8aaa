//! Project-wide refactor cycle for `LoopManager`.

use super::LoopManager;
use crate::error::Result;
use crate::r#loop::state::{AgentStatus, OrchestrationState, WorkflowCommand};
use tracing::{info, warn};

impl LoopManager {
    /// `checkin`, then ask whether another refactoring round is needed.
    pub(crate) async fn run_refactor_checkin(&mut self) -> Result<OrchestrationState> {
        self.execute(WorkflowCommand::Checkin).await?;

        match self.execute_with_status(WorkflowCommand::Refactor).await? {
            Some(AgentStatus::RefactoringNeeded) => {
                info!("Refactoring needed, applying");
                Ok(OrchestrationState::RefactorApply)
            }
            Some(AgentStatus::NoRefactoringNeeded) => Ok(OrchestrationState::Done),
            other => {
                warn!("Unexpected refactor status {:?}, finishing", other);
                Ok(OrchestrationState::Done)
            }
        }
    }

    /// `finalize` the round and check in again.
    pub(crate) async fn run_refactor_apply(&mut self) -> Result<OrchestrationState> {
        self.execute(WorkflowCommand::Finalize).await?;
        self.state.record_refactor_round();
        Ok(OrchestrationState::RefactorCheckin)
    }
}
