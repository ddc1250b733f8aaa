//! Mock implementations of testing traits.
//!
//! These mocks provide controllable test doubles for the agent subprocess,
//! sleeping, status reporting and observability, enabling deterministic unit
//! tests of the executor and the orchestration loop.

use super::traits::{AgentOutput, AgentProcess, Sleeper, StatusSource};
use crate::analytics::{Observer, WorkflowEvent};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Lock a mutex, recovering the data if a panicking test poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One scripted reaction of [`MockAgentProcess`].
#[derive(Debug, Clone)]
enum MockResponse {
    /// Return the output and touch the completion marker.
    Output(AgentOutput),
    /// Return the output without ever touching the marker.
    Silent(AgentOutput),
    /// Fail to spawn.
    SpawnError(String),
}

type CommandHook = Box<dyn Fn() + Send + Sync>;

/// Mock implementation of the agent subprocess.
///
/// Scripted responses are consumed in order; once exhausted every call
/// returns the default output. When a marker path is configured the mock
/// creates it after each successful invocation, the way the agent's Stop hook
/// would.
///
/// # Example
///
/// ```rust,ignore
/// let agent = MockAgentProcess::new()
///     .with_marker(dir.join(".claude/signal_task_complete"))
///     .then_spawn_error("no such file")
///     .then_output(AgentOutput::success(r#"{"ok":true}"#));
/// ```
pub struct MockAgentProcess {
    responses: Mutex<VecDeque<MockResponse>>,
    default_output: AgentOutput,
    marker: Option<PathBuf>,
    hooks: Vec<(String, CommandHook)>,
    invocations: Mutex<Vec<Vec<String>>>,
    call_count: AtomicU32,
}

impl std::fmt::Debug for MockAgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAgentProcess")
            .field("marker", &self.marker)
            .field("hooks", &self.hooks.len())
            .field("call_count", &self.call_count())
            .finish()
    }
}

impl Default for MockAgentProcess {
    fn default() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_output: AgentOutput::success(r#"{"result":"ok"}"#),
            marker: None,
            hooks: Vec::new(),
            invocations: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }
}

impl MockAgentProcess {
    /// Create a new mock with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Touch this marker after every successful invocation.
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Set the output returned once the script is exhausted.
    #[must_use]
    pub fn with_default_output(mut self, output: AgentOutput) -> Self {
        self.default_output = output;
        self
    }

    /// Queue an output that also touches the marker.
    #[must_use]
    pub fn then_output(self, output: AgentOutput) -> Self {
        self.push(MockResponse::Output(output))
    }

    /// Queue an output that never touches the marker.
    #[must_use]
    pub fn then_silent(self, output: AgentOutput) -> Self {
        self.push(MockResponse::Silent(output))
    }

    /// Queue a spawn failure.
    #[must_use]
    pub fn then_spawn_error(self, message: &str) -> Self {
        self.push(MockResponse::SpawnError(message.to_string()))
    }

    /// Run `hook` whenever `command` is invoked, before the response is produced.
    #[must_use]
    pub fn on_command(mut self, command: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.push((command.to_string(), Box::new(hook)));
        self
    }

    fn push(self, response: MockResponse) -> Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Get the number of times invoke was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every argv the mock has received, in order.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        lock(&self.invocations).clone()
    }

    /// The command positional (`-p <command>`) of each invocation, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.invocations)
            .iter()
            .filter_map(|argv| {
                argv.iter()
                    .position(|arg| arg == "-p")
                    .and_then(|idx| argv.get(idx + 1))
                    .cloned()
            })
            .collect()
    }

    fn touch_marker(&self) -> Result<()> {
        if let Some(ref marker) = self.marker {
            if let Some(parent) = marker.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(marker, "")?;
        }
        Ok(())
    }
}

#[async_trait]
impl AgentProcess for MockAgentProcess {
    async fn invoke(&self, argv: &[String]) -> Result<AgentOutput> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.invocations).push(argv.to_vec());

        let command = argv
            .iter()
            .position(|arg| arg == "-p")
            .and_then(|idx| argv.get(idx + 1));
        if let Some(command) = command {
            for (name, hook) in &self.hooks {
                if name == command {
                    hook();
                }
            }
        }

        let response = lock(&self.responses).pop_front();
        match response {
            Some(MockResponse::SpawnError(message)) => bail!("{}", message),
            Some(MockResponse::Silent(output)) => Ok(output),
            Some(MockResponse::Output(output)) => {
                self.touch_marker()?;
                Ok(output)
            }
            None => {
                self.touch_marker()?;
                Ok(self.default_output.clone())
            }
        }
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Create a new recording sleeper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}

/// Status source that replays a fixed script of statuses.
///
/// Each call consumes one entry; an exhausted script yields `None`.
#[derive(Debug, Default)]
pub struct ScriptedStatusSource {
    statuses: Mutex<VecDeque<Option<String>>>,
    reads: AtomicU32,
}

impl ScriptedStatusSource {
    /// Create a source that replays `statuses` in order.
    #[must_use]
    pub fn with_statuses<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statuses: Mutex::new(statuses.into_iter().map(|s| Some(s.into())).collect()),
            reads: AtomicU32::new(0),
        }
    }

    /// Number of times the source was consulted.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of statuses not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.statuses).len()
    }
}

impl StatusSource for ScriptedStatusSource {
    fn take_latest(&self) -> Option<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.statuses).pop_front().flatten()
    }
}

/// Observer that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingObserver {
    /// Create a new recording observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<WorkflowEvent> {
        lock(&self.events).clone()
    }
}

impl Observer for RecordingObserver {
    fn record(&self, event: &WorkflowEvent) {
        lock(&self.events).push(event.clone());
    }
}
