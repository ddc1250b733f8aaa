//! Observability context for the workflow.
//!
//! Components never log metrics into process-wide registries. Instead the
//! caller builds an [`Observer`] (usually an [`ObserverSet`]) and passes it
//! into the executor and the loop manager, which call
//! [`Observer::record`] at each lifecycle point. Observers only watch; nothing
//! they do can change control flow.
//!
//! - [`TracingObserver`] - forwards events to `tracing`
//! - [`EventLog`] - appends events to `.autodev/events.jsonl`
//! - [`metrics::MetricsCollector`] - in-memory aggregation for the run summary

pub mod metrics;

pub use metrics::{CommandStats, MetricsCollector, MetricsSummary};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Directory holding autodev's own artifacts inside the project.
pub const AUTODEV_DIR: &str = ".autodev";

/// A lifecycle event emitted by the executor or the loop manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// An agent command is about to run.
    CommandStarted { command: String },
    /// An agent command ran to completion and returned JSON.
    CommandCompleted {
        command: String,
        duration_ms: u64,
        attempts: u32,
    },
    /// An agent command failed for good.
    CommandFailed {
        command: String,
        kind: String,
        duration_ms: u64,
    },
    /// A transient failure will be retried after `delay_ms`.
    RetryScheduled {
        command: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// The agent reported a usage limit; waiting `seconds` before resuming.
    UsageLimitWait { command: String, seconds: u64 },
    /// The completion marker appeared.
    MarkerDetected { elapsed_ms: u64 },
    /// The state machine moved between states.
    StateTransition { from: String, to: String },
    /// A task exhausted its fix attempts and was skipped.
    TaskAbandoned { task: String, attempts: u32 },
}

impl WorkflowEvent {
    /// Short snake_case name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommandStarted { .. } => "command_started",
            Self::CommandCompleted { .. } => "command_completed",
            Self::CommandFailed { .. } => "command_failed",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::UsageLimitWait { .. } => "usage_limit_wait",
            Self::MarkerDetected { .. } => "marker_detected",
            Self::StateTransition { .. } => "state_transition",
            Self::TaskAbandoned { .. } => "task_abandoned",
        }
    }
}

/// Receiver of workflow events.
pub trait Observer: Send + Sync {
    /// Record one event. Must not fail or block for long.
    fn record(&self, event: &WorkflowEvent);
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn record(&self, _event: &WorkflowEvent) {}
}

/// Observer that emits each event as a `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::StateTransition { from, to } => {
                info!("State transition: {} -> {}", from, to);
            }
            WorkflowEvent::TaskAbandoned { task, attempts } => {
                warn!("Abandoned task '{}' after {} fix attempts", task, attempts);
            }
            WorkflowEvent::RetryScheduled {
                command,
                attempt,
                delay_ms,
            } => {
                debug!(
                    "Retry {} of {} scheduled in {}ms",
                    attempt, command, delay_ms
                );
            }
            other => debug!(event = other.name(), "{:?}", other),
        }
    }
}

/// Fan-out to several observers.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ObserverSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer.
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of observers in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Observer for ObserverSet {
    fn record(&self, event: &WorkflowEvent) {
        for observer in &self.observers {
            observer.record(event);
        }
    }
}

/// One line of the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub session: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

/// Append-only JSONL log of workflow events.
#[derive(Debug)]
pub struct EventLog {
    project_dir: PathBuf,
    session: String,
}

impl EventLog {
    /// Create an event log for the project, tagged with `session`.
    pub fn new(project_dir: impl AsRef<Path>, session: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            session: session.into(),
        }
    }

    /// Get the event log file path
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.project_dir.join(AUTODEV_DIR).join("events.jsonl")
    }

    /// Append one event.
    pub fn append(&self, event: &WorkflowEvent) -> Result<()> {
        let dir = self.project_dir.join(AUTODEV_DIR);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let entry = LoggedEvent {
            session: self.session.clone(),
            timestamp: Utc::now(),
            event: event.clone(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())?;
        let json = serde_json::to_string(&entry)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

impl Observer for EventLog {
    fn record(&self, event: &WorkflowEvent) {
        if let Err(e) = self.append(event) {
            warn!("Failed to append to event log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;
    use tempfile::TempDir;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = WorkflowEvent::UsageLimitWait {
            command: "/continue".to_string(),
            seconds: 60,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "usage_limit_wait");
        assert_eq!(json["seconds"], 60);
        assert_eq!(event.name(), "usage_limit_wait");
    }

    #[test]
    fn test_observer_set_fans_out() {
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        let set = ObserverSet::new()
            .with(first.clone())
            .with(second.clone());

        set.record(&WorkflowEvent::MarkerDetected { elapsed_ms: 12 });

        assert_eq!(set.len(), 2);
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events(), first.events());
    }

    #[test]
    fn test_event_log_round_trip() {
        let temp = TempDir::new().unwrap();
        let log = EventLog::new(temp.path(), "session-1");

        log.record(&WorkflowEvent::StateTransition {
            from: "tdd_cycle".to_string(),
            to: "project_complete_check".to_string(),
        });
        log.record(&WorkflowEvent::TaskAbandoned {
            task: "Write parser".to_string(),
            attempts: 4,
        });

        let content = std::fs::read_to_string(log.log_file()).unwrap();
        let events: Vec<LoggedEvent> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].session, "session-1");
        assert!(matches!(
            events[1].event,
            WorkflowEvent::TaskAbandoned { attempts: 4, .. }
        ));
        assert!(log.log_file().ends_with(".autodev/events.jsonl"));
    }
}
