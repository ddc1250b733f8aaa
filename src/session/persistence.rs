//! `.autodev/session.json`: the snapshot written when a run is interrupted.
//!
//! Writes go to `session.json.tmp` and are renamed into place while holding
//! an exclusive `fs2` lock on `session.lock`, so a reader never sees half a
//! snapshot. A file that fails to parse or carries another schema version is
//! discarded on load rather than reported as an error: the snapshot is only a
//! hint about where the last run stopped.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use super::{WorkflowSnapshot, SNAPSHOT_VERSION};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SessionPersistence {
    dir: PathBuf,
}

impl SessionPersistence {
    /// Store snapshots under `dir` (normally `<project>/.autodev`).
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn session_file_path(&self) -> PathBuf {
        self.dir.join("session.json")
    }

    fn staging_path(&self) -> PathBuf {
        self.dir.join("session.json.tmp")
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join("session.lock")
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.session_file_path().is_file()
    }

    /// Replace the stored snapshot.
    ///
    /// # Errors
    ///
    /// Fails if `.autodev` cannot be created or the snapshot cannot be
    /// written and renamed into place.
    pub fn save(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let lock = File::create(self.lock_path())?;
        FileExt::lock_exclusive(&lock)?;

        let staging = self.staging_path();
        let mut writer = BufWriter::new(File::create(&staging)?);
        serde_json::to_writer_pretty(&mut writer, snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&staging, self.session_file_path())?;

        FileExt::unlock(&lock)?;
        debug!(
            "Saved snapshot of session {} in state {}",
            snapshot.session_id, snapshot.state
        );
        Ok(())
    }

    /// The snapshot left by an interrupted run, if a usable one exists.
    ///
    /// # Errors
    ///
    /// Fails only when the file exists but cannot be read.
    pub fn load(&self) -> Result<Option<WorkflowSnapshot>> {
        let path = self.session_file_path();
        let lock = File::open(self.lock_path()).ok();
        if let Some(lock) = &lock {
            FileExt::lock_shared(lock)?;
        }

        let read = fs::read_to_string(&path);
        if let Some(lock) = &lock {
            FileExt::unlock(lock)?;
        }
        let text = match read {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<WorkflowSnapshot>(&text) {
            Ok(snapshot) if snapshot.is_version_compatible() => Ok(Some(snapshot)),
            Ok(snapshot) => {
                self.discard(&format!(
                    "schema version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ));
                Ok(None)
            }
            Err(e) => {
                self.discard(&e.to_string());
                Ok(None)
            }
        }
    }

    fn discard(&self, reason: &str) {
        let path = self.session_file_path();
        warn!("Discarding unusable snapshot {}: {}", path.display(), reason);
        if let Err(e) = fs::remove_file(&path) {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }

    /// Remove the stored snapshot. Missing files are fine.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be removed.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(self.session_file_path()) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionPersistence) {
        let temp = TempDir::new().unwrap();
        let store = SessionPersistence::new(temp.path().join(".autodev"));
        (temp, store)
    }

    fn interrupted_run() -> WorkflowSnapshot {
        let mut snapshot = WorkflowSnapshot::new("run-7");
        snapshot.state = "tdd_cycle".to_string();
        snapshot.current_task = Some("Write printer".to_string());
        snapshot.fix_attempts.insert("Write printer".to_string(), 2);
        snapshot.tasks_abandoned.push("Write parser".to_string());
        snapshot.commands_run = 14;
        snapshot
    }

    #[test]
    fn test_no_previous_run() {
        let (_temp, store) = store();
        assert!(!store.exists());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_interrupted_run_is_recovered() {
        let (_temp, store) = store();
        let snapshot = interrupted_run();
        store.save(&snapshot).unwrap();

        assert!(store.exists());
        assert!(!store.staging_path().exists());
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_later_save_wins() {
        let (_temp, store) = store();
        store.save(&WorkflowSnapshot::new("run-1")).unwrap();
        store.save(&interrupted_run()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.session_id, "run-7");
        assert_eq!(loaded.fix_attempts["Write printer"], 2);
    }

    #[test]
    fn test_truncated_snapshot_is_discarded() {
        let (temp, store) = store();
        fs::create_dir_all(temp.path().join(".autodev")).unwrap();
        fs::write(store.session_file_path(), r#"{"version": 1, "session_id": "#).unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.exists());
    }

    #[test]
    fn test_other_schema_version_is_discarded() {
        let (_temp, store) = store();
        let mut snapshot = interrupted_run();
        snapshot.version = SNAPSHOT_VERSION + 1;
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.exists());
    }

    #[test]
    fn test_delete_after_clean_finish() {
        let (_temp, store) = store();
        store.delete().unwrap();

        store.save(&interrupted_run()).unwrap();
        store.delete().unwrap();
        assert!(!store.exists());
    }
}
