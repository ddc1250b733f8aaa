//! Trait definitions for testable abstractions.
//!
//! These traits abstract the external collaborators of the command lifecycle
//! (the agent subprocess, wall-clock sleeping, the status-file service) so the
//! executor and the state machine can be unit tested without spawning
//! processes or waiting in real time.

use async_trait::async_trait;
use std::time::Duration;

/// Captured result of one agent invocation.
///
/// A non-zero exit code is data, not an error: the executor decides what it
/// means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    /// Exit code (None when the process was killed by a signal).
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl AgentOutput {
    /// Create a successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Create a failed output with the given stderr.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Standard output and standard error joined for pattern matching.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{} {}", self.stdout, self.stderr)
    }
}

/// Abstraction for the external agent subprocess.
///
/// # Example
///
/// ```rust,ignore
/// use autodev::testing::AgentProcess;
///
/// async fn agent_available(agent: &impl AgentProcess) -> bool {
///     let argv = vec!["claude".to_string(), "--version".to_string()];
///     agent.invoke(&argv).await.is_ok()
/// }
/// ```
#[async_trait]
pub trait AgentProcess: Send + Sync {
    /// Run the full argv to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be spawned or its
    /// pipes could not be read. A non-zero exit is reported in the output.
    async fn invoke(&self, argv: &[String]) -> anyhow::Result<AgentOutput>;
}

/// Abstraction for blocking waits (retry backoff, usage-limit waits).
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Abstraction for the status-reporting collaborator.
///
/// Implementations return the newest reported status and clear everything
/// that was reported, so a status is never observed twice.
pub trait StatusSource: Send + Sync {
    /// Take the latest status, or `None` if nothing was reported.
    fn take_latest(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_output_success() {
        let output = AgentOutput::success("{}");
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "{}");
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn test_agent_output_combined() {
        let output = AgentOutput {
            exit_code: Some(1),
            stdout: "partial".to_string(),
            stderr: "Usage limit reached".to_string(),
        };
        assert_eq!(output.combined(), "partial Usage limit reached");
    }
}
