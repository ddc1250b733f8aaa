//! In-memory metrics aggregation.
//!
//! [`MetricsCollector`] is an [`Observer`] that folds command events into
//! per-command counters and duration statistics. The binary prints its
//! [`MetricsSummary`] when a run ends.

use super::{Observer, WorkflowEvent};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Duration statistics and counts for one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandStats {
    pub succeeded: u64,
    pub failed: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub total_ms: u64,
}

impl CommandStats {
    fn observe(&mut self, duration_ms: u64, success: bool) {
        if self.count() == 0 {
            self.min_ms = duration_ms;
            self.max_ms = duration_ms;
        } else {
            self.min_ms = self.min_ms.min(duration_ms);
            self.max_ms = self.max_ms.max(duration_ms);
        }
        self.total_ms += duration_ms;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Total number of completed operations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Mean duration, 0 when nothing was observed.
    #[must_use]
    pub fn avg_ms(&self) -> u64 {
        self.total_ms.checked_div(self.count()).unwrap_or(0)
    }
}

/// Snapshot of everything collected so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub by_command: BTreeMap<String, CommandStats>,
    pub retries: u64,
    pub usage_limit_waits: u64,
    pub usage_limit_seconds: u64,
    pub abandoned_tasks: u64,
}

impl MetricsSummary {
    /// Total operations across all commands.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.by_command.values().map(CommandStats::count).sum()
    }

    /// Fraction of operations that succeeded, 1.0 when nothing ran.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            return 1.0;
        }
        let succeeded: u64 = self.by_command.values().map(|s| s.succeeded).sum();
        succeeded as f64 / total as f64
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("{}", "Run summary".bold());
        for (command, stats) in &self.by_command {
            println!(
                "  {:<12} ok={} failed={} avg={}ms min={}ms max={}ms",
                command.cyan(),
                stats.succeeded,
                stats.failed,
                stats.avg_ms(),
                stats.min_ms,
                stats.max_ms
            );
        }
        println!(
            "  retries={} usage_limit_waits={} ({}s) abandoned_tasks={}",
            self.retries, self.usage_limit_waits, self.usage_limit_seconds, self.abandoned_tasks
        );
    }
}

/// Observer that aggregates command metrics.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    summary: Mutex<MetricsSummary>,
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current aggregates.
    pub fn summary(&self) -> MetricsSummary {
        self.summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Observer for MetricsCollector {
    fn record(&self, event: &WorkflowEvent) {
        let mut summary = self
            .summary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match event {
            WorkflowEvent::CommandCompleted {
                command,
                duration_ms,
                ..
            } => summary
                .by_command
                .entry(command.clone())
                .or_default()
                .observe(*duration_ms, true),
            WorkflowEvent::CommandFailed {
                command,
                duration_ms,
                ..
            } => summary
                .by_command
                .entry(command.clone())
                .or_default()
                .observe(*duration_ms, false),
            WorkflowEvent::RetryScheduled { .. } => summary.retries += 1,
            WorkflowEvent::UsageLimitWait { seconds, .. } => {
                summary.usage_limit_waits += 1;
                summary.usage_limit_seconds += seconds;
            }
            WorkflowEvent::TaskAbandoned { .. } => summary.abandoned_tasks += 1,
            _ => {}
        }
    }
}
