//! Real implementations of testable traits.
//!
//! These implementations spawn actual processes and sleep on the tokio
//! timer. They implement the same traits as the mocks, enabling dependency
//! injection.

use crate::testing::{AgentOutput, AgentProcess, Sleeper};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Real agent process implementation.
///
/// Runs the argv as a subprocess in the project directory and captures its
/// output. The first argv element is the program.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    project_dir: PathBuf,
}

impl ClaudeCli {
    /// Create a process runner for the given directory.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self { project_dir }
    }
}

#[async_trait]
impl AgentProcess for ClaudeCli {
    async fn invoke(&self, argv: &[String]) -> Result<AgentOutput> {
        let (program, args) = argv.split_first().context("Empty agent argv")?;
        debug!("Spawning {} in {}", program, self.project_dir.display());

        let output = AsyncCommand::new(program)
            .args(args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program))?;

        Ok(AgentOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
