//! Test fixtures for creating reproducible test environments.
//!
//! Provides a temporary project with a task list and fast workflow timings.

use crate::config::{WorkflowConfig, DEFAULT_PLAN_FILE, DEFAULT_SIGNAL_FILE};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// A temporary project directory with an `Implementation Plan.md`.
///
/// Automatically cleans up when dropped.
///
/// # Example
///
/// ```rust,ignore
/// let project = TestProject::with_plan("- [ ] A\n- [ ] B\n");
/// let config = project.workflow_config();
/// ```
pub struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    /// Create a project whose task list contains `plan`.
    ///
    /// # Panics
    ///
    /// Panics if the directory or file cannot be created.
    #[must_use]
    pub fn with_plan(plan: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::write(temp_dir.path().join(DEFAULT_PLAN_FILE), plan)
            .expect("Failed to write task list");
        Self { temp_dir }
    }

    /// Create a project with no task list.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn plan_path(&self) -> PathBuf {
        self.path().join(DEFAULT_PLAN_FILE)
    }

    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.path().join(DEFAULT_SIGNAL_FILE)
    }

    /// Default configuration with millisecond-scale marker polling and no
    /// retry jitter.
    #[must_use]
    pub fn workflow_config(&self) -> WorkflowConfig {
        let mut config = WorkflowConfig::default();
        config.signal.timeout_secs = 0.5;
        config.signal.min_interval_secs = 0.005;
        config.signal.max_interval_secs = 0.02;
        config.retry.jitter_factor = 0.0;
        config
    }

    /// Read the task list.
    #[must_use]
    pub fn read_plan(&self) -> String {
        std::fs::read_to_string(self.plan_path()).expect("Failed to read task list")
    }
}

/// Tick the checkbox of `task` and move the file's mtime forward one second,
/// the way an agent finishing the task would.
///
/// # Panics
///
/// Panics if the file cannot be read or written.
pub fn tick_task(plan_path: &Path, task: &str) {
    let content = std::fs::read_to_string(plan_path).expect("Failed to read task list");
    let previous = std::fs::metadata(plan_path)
        .and_then(|m| m.modified())
        .expect("Failed to read mtime");
    let updated = content.replacen(&format!("- [ ] {task}"), &format!("- [X] {task}"), 1);
    std::fs::write(plan_path, updated).expect("Failed to write task list");
    set_mtime_after(plan_path, previous);
}

/// Tick the first incomplete checkbox, if any.
///
/// # Panics
///
/// Panics if the file cannot be read or written.
pub fn tick_first_task(plan_path: &Path) {
    let content = std::fs::read_to_string(plan_path).expect("Failed to read task list");
    if let Some(task) = crate::r#loop::task_tracker::parsing::incomplete_tasks(&content)
        .into_iter()
        .next()
    {
        tick_task(plan_path, &task);
    }
}

/// Mtime resolution can be coarse, so step strictly past the old value.
fn set_mtime_after(path: &Path, previous: SystemTime) {
    let file = File::options()
        .write(true)
        .open(path)
        .expect("Failed to open task list");
    let current = file
        .metadata()
        .and_then(|m| m.modified())
        .expect("Failed to read mtime");
    file.set_modified(current.max(previous) + Duration::from_secs(1))
        .expect("Failed to set mtime");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_plan_writes_task_list() {
        let project = TestProject::with_plan("- [ ] A\n");
        assert!(project.plan_path().exists());
        assert_eq!(project.read_plan(), "- [ ] A\n");
    }

    #[test]
    fn test_tick_task_marks_and_bumps_mtime() {
        let project = TestProject::with_plan("- [ ] A\n- [ ] B\n");
        let before = std::fs::metadata(project.plan_path())
            .unwrap()
            .modified()
            .unwrap();

        tick_task(&project.plan_path(), "B");

        assert_eq!(project.read_plan(), "- [ ] A\n- [X] B\n");
        let after = std::fs::metadata(project.plan_path())
            .unwrap()
            .modified()
            .unwrap();
        assert!(after > before);
    }

    #[test]
    fn test_tick_first_task() {
        let project = TestProject::with_plan("- [X] A\n- [ ] B\n- [ ] C\n");
        tick_first_task(&project.plan_path());
        assert_eq!(project.read_plan(), "- [X] A\n- [X] B\n- [ ] C\n");
    }

    #[test]
    fn test_workflow_config_is_valid() {
        let project = TestProject::empty();
        assert!(project.workflow_config().validate().is_ok());
    }
}
