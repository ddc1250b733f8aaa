//! Status files written by the agent's status service.
//!
//! After certain commands the agent reports an outcome by writing
//! `status_<YYYYMMDD_HHMMSS>.json` into the status directory:
//!
//! ```text
//! .claude/status_20250115_143012.json   {"status": "validation_passed", ...}
//! ```
//!
//! The timestamp format sorts lexicographically, so the newest file is the
//! last one by name. Reading consumes every status file so stale reports are
//! never seen twice.

use crate::testing::StatusSource;
use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name pattern of status files.
pub const STATUS_FILE_PATTERN: &str = "status_*.json";

/// Reads and clears status files in a directory.
#[derive(Debug, Clone)]
pub struct StatusFileReader {
    dir: PathBuf,
}

impl StatusFileReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Status files currently present, oldest first.
    #[must_use]
    pub fn status_files(&self) -> Vec<PathBuf> {
        let matcher = match status_matcher() {
            Some(matcher) => matcher,
            None => return Vec::new(),
        };
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Status directory {} unavailable: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| matcher.is_match(Path::new(name)))
            })
            .collect();
        files.sort();
        files
    }
}

impl StatusSource for StatusFileReader {
    fn take_latest(&self) -> Option<String> {
        let files = self.status_files();
        let newest = files.last()?;

        let status = match read_status(newest) {
            Ok(status) => {
                debug!("Read status '{}' from {}", status, newest.display());
                Some(status)
            }
            Err(e) => {
                warn!("Ignoring malformed status file {}: {}", newest.display(), e);
                None
            }
        };

        for file in &files {
            if let Err(e) = std::fs::remove_file(file) {
                warn!("Failed to remove status file {}: {}", file.display(), e);
            }
        }
        status
    }
}

fn status_matcher() -> Option<GlobMatcher> {
    match Glob::new(STATUS_FILE_PATTERN) {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            warn!("Invalid status file pattern: {}", e);
            None
        }
    }
}

fn read_status(path: &Path) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    value
        .get("status")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no string 'status' field"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_missing_directory_yields_none() {
        let temp = TempDir::new().unwrap();
        let reader = StatusFileReader::new(temp.path().join("nope"));
        assert_eq!(reader.take_latest(), None);
    }

    #[test]
    fn test_empty_directory_yields_none() {
        let temp = TempDir::new().unwrap();
        let reader = StatusFileReader::new(temp.path());
        assert_eq!(reader.take_latest(), None);
    }

    #[test]
    fn test_newest_wins_and_all_are_removed() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "status_20250115_100000.json", r#"{"status":"validation_failed"}"#);
        write(temp.path(), "status_20250115_120000.json", r#"{"status":"validation_passed"}"#);
        write(temp.path(), "status_20250114_235959.json", r#"{"status":"project_complete"}"#);
        write(temp.path(), "settings.local.json", "{}");

        let reader = StatusFileReader::new(temp.path());
        assert_eq!(reader.take_latest().as_deref(), Some("validation_passed"));
        assert!(reader.status_files().is_empty());
        assert!(temp.path().join("settings.local.json").exists());

        // Consumed: the next read sees nothing.
        assert_eq!(reader.take_latest(), None);
    }

    #[test]
    fn test_malformed_newest_still_clears() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "status_20250115_100000.json", r#"{"status":"validation_passed"}"#);
        write(temp.path(), "status_20250115_110000.json", "not json");

        let reader = StatusFileReader::new(temp.path());
        assert_eq!(reader.take_latest(), None);
        assert!(reader.status_files().is_empty());
    }

    #[test]
    fn test_status_files_sorted() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "status_20250115_120000.json", "{}");
        write(temp.path(), "status_20250115_080000.json", "{}");

        let files = StatusFileReader::new(temp.path()).status_files();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["status_20250115_080000.json", "status_20250115_120000.json"]
        );
    }
}
