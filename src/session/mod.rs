//! Session snapshots for graceful shutdown.
//!
//! The loop manager keeps a [`WorkflowSnapshot`] current as it moves through
//! states. When the process is interrupted the shutdown handler writes the
//! latest snapshot to `.autodev/session.json`, so an operator can see where a
//! run stopped and which tasks were struggling.
//!
//! # Architecture
//!
//! ```text
//! LoopManager ──update──> SharedSnapshot <──read── ShutdownHandler
//!                                                     │
//!                                                     ▼
//!                                             SessionPersistence
//!                                        (tmp + rename, fs2 lock)
//! ```

pub mod persistence;
pub mod signals;

pub use persistence::SessionPersistence;
pub use signals::{ShutdownHandler, ShutdownHandlerConfig, ShutdownResult};

use crate::r#loop::state::LoopState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Current schema version for snapshots.
/// Increment when making breaking changes to the serialization format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot shared between the loop manager and the shutdown handler.
pub type SharedSnapshot = Arc<Mutex<WorkflowSnapshot>>;

/// Recoverable view of an orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub session_id: String,
    /// Process ID that last wrote this snapshot.
    pub pid: u32,
    /// Label of the current orchestration state.
    pub state: String,
    pub current_task: Option<String>,
    pub fix_attempts: BTreeMap<String, u32>,
    pub commands_run: u32,
    pub tasks_completed: u32,
    pub tasks_abandoned: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    /// Snapshot of a run that has not started yet.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: SNAPSHOT_VERSION,
            session_id: session_id.into(),
            pid: std::process::id(),
            state: "starting".to_string(),
            current_task: None,
            fix_attempts: BTreeMap::new(),
            commands_run: 0,
            tasks_completed: 0,
            tasks_abandoned: Vec::new(),
            started_at: now,
            saved_at: now,
        }
    }

    /// Copy the run state and the tracker's attempt counts.
    pub fn update(&mut self, state: &LoopState, fix_attempts: BTreeMap<String, u32>) {
        self.session_id.clone_from(&state.session_id);
        self.state = state.current.label().to_string();
        self.current_task = state.current.task().map(str::to_string);
        self.fix_attempts = fix_attempts;
        self.commands_run = state.commands_run;
        self.tasks_completed = state.tasks_completed;
        self.tasks_abandoned.clone_from(&state.tasks_abandoned);
        self.started_at = state.started_at;
    }

    /// Refresh the save timestamp and PID.
    pub fn touch(&mut self) {
        self.saved_at = Utc::now();
        self.pid = std::process::id();
    }

    #[must_use]
    pub fn is_version_compatible(&self) -> bool {
        self.version == SNAPSHOT_VERSION
    }

    /// Wrap into a [`SharedSnapshot`].
    #[must_use]
    pub fn shared(self) -> SharedSnapshot {
        Arc::new(Mutex::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r#loop::state::OrchestrationState;

    #[test]
    fn test_new_snapshot() {
        let snapshot = WorkflowSnapshot::new("abc");
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.state, "starting");
        assert_eq!(snapshot.pid, std::process::id());
        assert!(snapshot.is_version_compatible());
    }

    #[test]
    fn test_update_copies_loop_state() {
        let mut state = LoopState::new();
        state.transition(OrchestrationState::TddCycle {
            task: "Write parser".to_string(),
        });
        state.record_command();
        state.record_task_abandoned("Old task");

        let mut attempts = BTreeMap::new();
        attempts.insert("Write parser".to_string(), 2);

        let mut snapshot = WorkflowSnapshot::new("placeholder");
        snapshot.update(&state, attempts);

        assert_eq!(snapshot.session_id, state.session_id);
        assert_eq!(snapshot.state, "tdd_cycle");
        assert_eq!(snapshot.current_task.as_deref(), Some("Write parser"));
        assert_eq!(snapshot.fix_attempts["Write parser"], 2);
        assert_eq!(snapshot.commands_run, 1);
        assert_eq!(snapshot.tasks_abandoned, vec!["Old task"]);
    }

    #[test]
    fn test_touch_advances_saved_at() {
        let mut snapshot = WorkflowSnapshot::new("s");
        let before = snapshot.saved_at;
        snapshot.touch();
        assert!(snapshot.saved_at >= before);
    }
}
