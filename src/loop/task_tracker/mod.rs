//! Task-level progress tracking.
//!
//! The task list is owned by the agent, which ticks checkboxes as it works.
//! [`TaskTracker`] keeps a cached copy of the document keyed by its
//! modification time and hands out the next incomplete task. It also counts
//! correction attempts per task and trips once a task exceeds the configured
//! maximum, after which the task is skipped.
//!
//! # Example
//!
//! ```rust,ignore
//! use autodev::r#loop::task_tracker::TaskTracker;
//!
//! let mut tracker = TaskTracker::new("Implementation Plan.md", 3);
//! while let Some(task) = tracker.get_next_task()? {
//!     // drive the TDD cycle for `task`
//! }
//! ```

pub mod parsing;

pub use parsing::TaskCounts;

use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Cached copy of the task list.
#[derive(Debug, Clone)]
struct PlanCache {
    modified: SystemTime,
    content: String,
}

/// Tracks the task list and per-task fix attempts.
#[derive(Debug)]
pub struct TaskTracker {
    plan_path: PathBuf,
    max_fix_attempts: u32,
    fix_attempts: HashMap<String, u32>,
    cache: Option<PlanCache>,
    reads: u32,
}

impl TaskTracker {
    /// Create a tracker for the task list at `plan_path`.
    pub fn new(plan_path: impl Into<PathBuf>, max_fix_attempts: u32) -> Self {
        Self {
            plan_path: plan_path.into(),
            max_fix_attempts,
            fix_attempts: HashMap::new(),
            cache: None,
            reads: 0,
        }
    }

    #[must_use]
    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    #[must_use]
    pub fn max_fix_attempts(&self) -> u32 {
        self.max_fix_attempts
    }

    /// Number of times the task list was actually read from disk.
    #[must_use]
    pub fn reads(&self) -> u32 {
        self.reads
    }

    // =========================================================================
    // Cached plan access
    // =========================================================================

    /// Current task list content, reloading if the file changed.
    ///
    /// The cache is served only while the file's modification time equals
    /// the one observed at the last read. Returns `None` when the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file exists but cannot be read.
    pub fn read_plan(&mut self) -> Result<Option<&str>> {
        let metadata = match std::fs::metadata(&self.plan_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Task list not found: {}", self.plan_path.display());
                self.cache = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified()?;

        let fresh = matches!(&self.cache, Some(cache) if cache.modified == modified);
        if !fresh {
            let content = std::fs::read_to_string(&self.plan_path)?;
            self.reads += 1;
            debug!(
                "Read task list {} ({} bytes)",
                self.plan_path.display(),
                content.len()
            );
            self.cache = Some(PlanCache { modified, content });
        }

        Ok(self.cache.as_ref().map(|cache| cache.content.as_str()))
    }

    /// Drop the cached copy so the next read goes to disk.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    // =========================================================================
    // Task queries
    // =========================================================================

    /// The first incomplete task that has not been abandoned.
    ///
    /// Returns `None` when every task is complete or abandoned, or when the
    /// task list is missing.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the task list cannot be read.
    pub fn get_next_task(&mut self) -> Result<Option<String>> {
        let tasks = self.incomplete_tasks()?;
        let next = tasks.into_iter().find(|task| !self.is_abandoned(task));
        match &next {
            Some(task) => info!("Next task: {}", task),
            None => info!("No remaining tasks in {}", self.plan_path.display()),
        }
        Ok(next)
    }

    /// All incomplete tasks, abandoned ones included.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the task list cannot be read.
    pub fn incomplete_tasks(&mut self) -> Result<Vec<String>> {
        Ok(self
            .read_plan()?
            .map(parsing::incomplete_tasks)
            .unwrap_or_default())
    }

    /// Complete and incomplete checkbox counts.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the task list cannot be read.
    pub fn counts(&mut self) -> Result<TaskCounts> {
        Ok(self
            .read_plan()?
            .map(parsing::count_tasks)
            .unwrap_or_default())
    }

    // =========================================================================
    // Fix-attempt circuit breaker
    // =========================================================================

    /// Record one more correction attempt for `task`.
    ///
    /// Returns `true` while the count is within the maximum and `false` once
    /// it is exceeded. The count keeps increasing either way.
    pub fn increment_fix_attempts(&mut self, task: &str) -> bool {
        let count = self.fix_attempts.entry(task.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        info!(
            "Fix attempt {}/{} for task '{}'",
            count, self.max_fix_attempts, task
        );

        let within_limit = count <= self.max_fix_attempts;
        if !within_limit {
            warn!(
                "Task '{}' exceeded max fix attempts ({})",
                task, self.max_fix_attempts
            );
        }
        within_limit
    }

    /// Forget the attempts for `task`. Safe to call for untracked tasks.
    pub fn reset_fix_attempts(&mut self, task: &str) {
        match self.fix_attempts.remove(task) {
            Some(attempts) => info!("Reset fix attempts for '{}' (had {})", task, attempts),
            None => debug!("No fix attempts to reset for '{}'", task),
        }
    }

    /// Correction attempts recorded for `task`.
    #[must_use]
    pub fn fix_attempts(&self, task: &str) -> u32 {
        self.fix_attempts.get(task).copied().unwrap_or(0)
    }

    /// Whether `task` exceeded the maximum and is skipped.
    #[must_use]
    pub fn is_abandoned(&self, task: &str) -> bool {
        self.fix_attempts(task) > self.max_fix_attempts
    }

    /// Abandoned tasks, sorted.
    #[must_use]
    pub fn abandoned_tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self
            .fix_attempts
            .iter()
            .filter(|(_, count)| **count > self.max_fix_attempts)
            .map(|(task, _)| task.clone())
            .collect();
        tasks.sort();
        tasks
    }

    /// Copy of every tracked attempt count.
    #[must_use]
    pub fn attempts_snapshot(&self) -> BTreeMap<String, u32> {
        self.fix_attempts
            .iter()
            .map(|(task, count)| (task.clone(), *count))
            .collect()
    }
}
