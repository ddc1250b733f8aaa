//! Testing infrastructure for autodev.
//!
//! This module provides traits, mocks, fixtures, and assertions for testing
//! the command lifecycle and the orchestration loop without a real agent.
//!
//! # Architecture
//!
//! The testing infrastructure is organized into:
//! - **Traits**: Abstractions for external collaborators (agent subprocess, sleeping, status files)
//! - **Mocks**: Test doubles that implement the traits with controllable behavior
//! - **Fixtures**: Temporary projects with a task list (test-only)
//! - **Assertions**: Custom assertions over commands and events
//!
//! # Example
//!
//! ```rust,ignore
//! use autodev::testing::{MockAgentProcess, ScriptedStatusSource, AgentOutput};
//!
//! let agent = MockAgentProcess::new()
//!     .with_marker(project.marker_path())
//!     .then_output(AgentOutput::success(r#"{"result":"ok"}"#));
//!
//! let status = ScriptedStatusSource::with_statuses(["validation_passed"]);
//! ```

pub mod assertions;
#[cfg(test)]
pub mod fixtures;
pub mod mocks;
pub mod traits;

// Re-export commonly used types
pub use assertions::*;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{Observer, WorkflowEvent};
    use std::time::Duration;

    // =========================================================================
    // Mock Agent Process Tests
    // =========================================================================

    #[tokio::test]
    async fn test_mock_agent_default_output() {
        let agent = MockAgentProcess::new();
        let output = agent.invoke(&["claude".to_string()]).await.unwrap();
        assert_eq!(output.stdout, r#"{"result":"ok"}"#);
        assert_eq!(agent.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_agent_scripted_responses_in_order() {
        let agent = MockAgentProcess::new()
            .then_spawn_error("not found")
            .then_output(AgentOutput::success("first"));

        assert!(agent.invoke(&[]).await.is_err());
        assert_eq!(agent.invoke(&[]).await.unwrap().stdout, "first");
        assert_eq!(
            agent.invoke(&[]).await.unwrap().stdout,
            r#"{"result":"ok"}"#
        );
    }

    #[tokio::test]
    async fn test_mock_agent_touches_marker_unless_silent() {
        let project = TestProject::empty();
        let agent = MockAgentProcess::new()
            .with_marker(project.marker_path())
            .then_silent(AgentOutput::success("{}"))
            .then_output(AgentOutput::success("{}"));

        agent.invoke(&[]).await.unwrap();
        assert!(!project.marker_path().exists());
        agent.invoke(&[]).await.unwrap();
        assert!(project.marker_path().exists());
    }

    #[tokio::test]
    async fn test_mock_agent_records_commands_and_runs_hooks() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let agent = MockAgentProcess::new().on_command("/update", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let argv = |cmd: &str| vec!["claude".to_string(), "-p".to_string(), cmd.to_string()];
        agent.invoke(&argv("/validate")).await.unwrap();
        agent.invoke(&argv("/update")).await.unwrap();

        assert_eq!(agent.commands(), vec!["/validate", "/update"]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(agent.invocations()[1][0], "claude");
    }

    // =========================================================================
    // Other Doubles
    // =========================================================================

    #[tokio::test]
    async fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(60)).await;
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60)]);
    }

    #[test]
    fn test_scripted_status_source() {
        let source = ScriptedStatusSource::with_statuses(["validation_passed", "project_complete"]);
        assert_eq!(source.take_latest().as_deref(), Some("validation_passed"));
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.take_latest().as_deref(), Some("project_complete"));
        assert_eq!(source.take_latest(), None);
        assert_eq!(source.reads(), 3);
    }

    #[test]
    fn test_recording_observer() {
        let observer = RecordingObserver::new();
        observer.record(&WorkflowEvent::MarkerDetected { elapsed_ms: 7 });
        assert_eq!(
            observer.events(),
            vec![WorkflowEvent::MarkerDetected { elapsed_ms: 7 }]
        );
    }
}
