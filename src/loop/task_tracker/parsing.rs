//! Task list parsing utilities.
//!
//! The task list is a markdown document. Only checkbox lines matter:
//!
//! ```text
//! - [X] Set up project      complete
//! - [ ] Write the parser    incomplete, task = "Write the parser"
//! ```
//!
//! Everything else in the document is ignored.

/// Marker for an incomplete task.
pub const INCOMPLETE_MARKER: &str = "- [ ]";

/// Markers for completed tasks.
pub const COMPLETE_MARKERS: [&str; 2] = ["- [X]", "- [x]"];

/// Counts of checkbox lines in a task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub complete: usize,
    pub incomplete: usize,
}

impl TaskCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.complete + self.incomplete
    }
}

// ============================================================================
// Checkbox Parsing
// ============================================================================

/// Extract the description of an incomplete task line.
///
/// The marker may appear anywhere on the line, so nested and indented items
/// count. A marker with nothing after it is not a task.
#[must_use]
pub fn parse_incomplete(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once(INCOMPLETE_MARKER)?;
    let task = rest.trim();
    (!task.is_empty()).then_some(task)
}

/// All incomplete tasks, in document order.
#[must_use]
pub fn incomplete_tasks(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(parse_incomplete)
        .map(str::to_string)
        .collect()
}

/// Count complete and incomplete checkbox lines.
#[must_use]
pub fn count_tasks(content: &str) -> TaskCounts {
    let mut counts = TaskCounts::default();
    for line in content.lines() {
        if parse_incomplete(line).is_some() {
            counts.incomplete += 1;
        } else if COMPLETE_MARKERS.iter().any(|marker| line.contains(marker)) {
            counts.complete += 1;
        }
    }
    counts
}
