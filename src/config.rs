//! Configuration management for autodev.
//!
//! Workflow settings live in `autodev.toml` at the project root. Every field
//! has a default, so the file is optional and may set only what it changes.
//! The agent's own settings (`.claude/settings.local.json`) are a separate
//! file; [`install_stop_hook`] writes the Stop hook that creates the
//! completion marker.

use crate::error::{AutodevError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the workflow configuration file.
pub const CONFIG_FILE: &str = "autodev.toml";

/// Agent settings file that carries the Stop hook.
pub const SETTINGS_FILE: &str = ".claude/settings.local.json";

/// Default task list document.
pub const DEFAULT_PLAN_FILE: &str = "Implementation Plan.md";

/// Default completion marker.
pub const DEFAULT_SIGNAL_FILE: &str = ".claude/signal_task_complete";

/// Minimum wait, in seconds, before retrying after a usage limit.
pub const MIN_WAIT_TIME: u64 = 60;

/// Maximum correction attempts per task.
pub const MAX_FIX_ATTEMPTS: u32 = 3;

/// Completion marker polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    /// Marker path, relative to the project directory.
    pub marker: PathBuf,
    /// Give up waiting after this many seconds.
    pub timeout_secs: f64,
    /// First polling interval.
    pub min_interval_secs: f64,
    /// Polling interval cap.
    pub max_interval_secs: f64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            marker: PathBuf::from(DEFAULT_SIGNAL_FILE),
            timeout_secs: 30.0,
            min_interval_secs: 0.1,
            max_interval_secs: 2.0,
        }
    }
}

/// Retry backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            jitter_factor: 0.1,
        }
    }
}

/// Circuit breaker settings shared by every agent command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Seconds an open breaker rejects calls before letting one through.
    pub recovery_timeout_secs: f64,
    /// Successes needed in the half-open state to close again.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
            half_open_max_calls: 3,
        }
    }
}

/// Workflow configuration loaded from `autodev.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Task list document, relative to the project directory.
    pub plan_file: PathBuf,
    /// Documents that only produce a warning when missing.
    pub optional_files: Vec<PathBuf>,
    /// Agent executable.
    pub program: String,
    /// Fix attempts allowed before a task is abandoned.
    pub max_fix_attempts: u32,
    /// Floor, in seconds, for usage-limit waits.
    pub min_wait_time: u64,
    /// Directory the status service writes `status_*.json` into.
    pub status_dir: PathBuf,
    pub signal: SignalSettings,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            plan_file: PathBuf::from(DEFAULT_PLAN_FILE),
            optional_files: vec![PathBuf::from("PRD.md"), PathBuf::from("CLAUDE.md")],
            program: "claude".to_string(),
            max_fix_attempts: MAX_FIX_ATTEMPTS,
            min_wait_time: MIN_WAIT_TIME,
            status_dir: PathBuf::from(".claude"),
            signal: SignalSettings::default(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl WorkflowConfig {
    /// Load configuration from a project directory.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the file cannot be read, is not valid
    /// TOML, or holds out-of-range values.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        if !path.exists() {
            debug!("No {} found, using defaults", CONFIG_FILE);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| AutodevError::config_with_path(e.to_string(), path.clone()))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutodevError::config_with_path(e.to_string(), path.clone()))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the `autodev.toml` path for a project
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_FILE)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if !(0.0..1.0).contains(&retry.jitter_factor) {
            return Err(AutodevError::config(format!(
                "retry.jitter_factor must be in [0, 1), got {}",
                retry.jitter_factor
            )));
        }
        if !(retry.base_delay_secs > 0.0) {
            return Err(AutodevError::config("retry.base_delay_secs must be positive"));
        }
        if retry.max_delay_secs < retry.base_delay_secs {
            return Err(AutodevError::config(
                "retry.max_delay_secs must be at least retry.base_delay_secs",
            ));
        }

        let signal = &self.signal;
        if !(signal.min_interval_secs > 0.0) {
            return Err(AutodevError::config(
                "signal.min_interval_secs must be positive",
            ));
        }
        if signal.max_interval_secs < signal.min_interval_secs {
            return Err(AutodevError::config(
                "signal.max_interval_secs must be at least signal.min_interval_secs",
            ));
        }
        if !(signal.timeout_secs >= 0.0) || !signal.timeout_secs.is_finite() {
            return Err(AutodevError::config(
                "signal.timeout_secs must be a non-negative number",
            ));
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.half_open_max_calls == 0 {
            return Err(AutodevError::config(
                "circuit_breaker.failure_threshold and half_open_max_calls must be at least 1",
            ));
        }
        if !(breaker.recovery_timeout_secs >= 0.0) || !breaker.recovery_timeout_secs.is_finite() {
            return Err(AutodevError::config(
                "circuit_breaker.recovery_timeout_secs must be a non-negative number",
            ));
        }

        if self.max_fix_attempts == 0 {
            return Err(AutodevError::config("max_fix_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Convert validated seconds into a `Duration`.
///
/// # Errors
///
/// Returns a `Config` error for negative, NaN or overflowing values.
pub fn secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| AutodevError::config(format!("{field}: {e}")))
}

// ============================================================================
// Prerequisite checks
// ============================================================================

/// Verify the documents the workflow needs.
///
/// Returns the optional documents that are missing; each is logged as a
/// warning.
///
/// # Errors
///
/// Returns `MissingFile` when the task list itself is absent.
pub fn check_prerequisites(project_dir: &Path, config: &WorkflowConfig) -> Result<Vec<PathBuf>> {
    let plan = project_dir.join(&config.plan_file);
    if !plan.exists() {
        return Err(AutodevError::MissingFile {
            path: config.plan_file.clone(),
        });
    }

    let missing: Vec<PathBuf> = config
        .optional_files
        .iter()
        .filter(|file| !project_dir.join(file).exists())
        .cloned()
        .collect();
    for file in &missing {
        warn!("{} is missing", file.display());
    }
    Ok(missing)
}

// ============================================================================
// Agent settings (.claude/settings.local.json)
// ============================================================================

/// The agent settings document. Keys autodev does not manage are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    #[serde(rename = "Stop", default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<HookMatcher>,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookMatcher {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub matcher: String,
    pub hooks: Vec<HookCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookCommand {
    #[serde(rename = "type")]
    pub hook_type: String,
    pub command: String,
}

impl HookMatcher {
    /// Stop hook that touches `marker` when an agent session ends.
    #[must_use]
    pub fn touch_marker(marker: &Path) -> Self {
        Self {
            matcher: String::new(),
            hooks: vec![HookCommand {
                hook_type: "command".to_string(),
                command: format!("touch {}", shell_quote(&marker.to_string_lossy())),
            }],
        }
    }
}

/// Single-quote `word` for `sh`.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Outcome of [`install_stop_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookInstall {
    /// A new settings file was created.
    Created,
    /// The Stop hook was added to an existing settings file.
    Updated,
    /// A Stop hook already existed and `force` was not set.
    AlreadyPresent,
}

/// Ensure the agent touches the completion marker when it finishes.
///
/// # Errors
///
/// Returns an error if the settings file exists but is not valid JSON, or
/// cannot be written.
pub fn install_stop_hook(project_dir: &Path, marker: &Path, force: bool) -> Result<HookInstall> {
    let path = project_dir.join(SETTINGS_FILE);

    let (mut settings, existed) = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let settings: AgentSettings = serde_json::from_str(&content)
            .map_err(|e| AutodevError::config_with_path(e.to_string(), path.clone()))?;
        (settings, true)
    } else {
        (AgentSettings::default(), false)
    };

    if !settings.hooks.stop.is_empty() && !force {
        info!("Stop hook already configured in {}", path.display());
        return Ok(HookInstall::AlreadyPresent);
    }

    settings.hooks.stop = vec![HookMatcher::touch_marker(marker)];

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&settings)?;
    std::fs::write(&path, json)?;

    Ok(if existed {
        HookInstall::Updated
    } else {
        HookInstall::Created
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_workflow_constants() {
        let config = WorkflowConfig::default();
        assert_eq!(config.plan_file, PathBuf::from("Implementation Plan.md"));
        assert_eq!(config.max_fix_attempts, 3);
        assert_eq!(config.min_wait_time, 60);
        assert_eq!(config.signal.marker, PathBuf::from(".claude/signal_task_complete"));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = WorkflowConfig::load(temp.path()).unwrap();
        assert_eq!(config, WorkflowConfig::default());
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            r#"
max_fix_attempts = 5
plan_file = "TODO.md"

[retry]
jitter_factor = 0.0
"#,
        )
        .unwrap();

        let config = WorkflowConfig::load(temp.path()).unwrap();
        assert_eq!(config.max_fix_attempts, 5);
        assert_eq!(config.plan_file, PathBuf::from("TODO.md"));
        assert_eq!(config.retry.jitter_factor, 0.0);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.program, "claude");
    }

    #[test]
    fn test_load_rejects_bad_jitter() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "[retry]\njitter_factor = 1.5\n",
        )
        .unwrap();

        let err = WorkflowConfig::load(temp.path()).unwrap_err();
        assert!(err.to_string().contains("jitter_factor"));
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "max_fix_attempts = [").unwrap();
        assert!(matches!(
            WorkflowConfig::load(temp.path()),
            Err(AutodevError::Config { path: Some(_), .. })
        ));
    }

    #[test]
    fn test_load_circuit_breaker_section() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "[circuit_breaker]\nfailure_threshold = 2\n",
        )
        .unwrap();

        let config = WorkflowConfig::load(temp.path()).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.half_open_max_calls, 3);

        let mut config = WorkflowConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_interval_ordering() {
        let mut config = WorkflowConfig::default();
        config.signal.max_interval_secs = 0.01;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secs_rejects_negative() {
        assert_eq!(secs("x", 1.5).unwrap(), Duration::from_millis(1500));
        assert!(secs("x", -1.0).is_err());
    }

    #[test]
    fn test_check_prerequisites_missing_plan() {
        let temp = TempDir::new().unwrap();
        let err = check_prerequisites(temp.path(), &WorkflowConfig::default()).unwrap_err();
        assert!(matches!(err, AutodevError::MissingFile { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_check_prerequisites_reports_optional() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("Implementation Plan.md"), "- [ ] A\n").unwrap();
        std::fs::write(temp.path().join("PRD.md"), "prd").unwrap();

        let missing = check_prerequisites(temp.path(), &WorkflowConfig::default()).unwrap();
        assert_eq!(missing, vec![PathBuf::from("CLAUDE.md")]);
    }

    #[test]
    fn test_install_stop_hook_creates_settings() {
        let temp = TempDir::new().unwrap();
        let marker = PathBuf::from(DEFAULT_SIGNAL_FILE);

        let outcome = install_stop_hook(temp.path(), &marker, false).unwrap();
        assert_eq!(outcome, HookInstall::Created);

        let content = std::fs::read_to_string(temp.path().join(SETTINGS_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["hooks"]["Stop"][0]["hooks"][0]["type"], "command");
        assert_eq!(
            json["hooks"]["Stop"][0]["hooks"][0]["command"],
            "touch '.claude/signal_task_complete'"
        );
    }

    #[test]
    fn test_stop_hook_quotes_marker_path() {
        let hook = HookMatcher::touch_marker(Path::new("my project/it's done"));
        assert_eq!(hook.hooks[0].command, r"touch 'my project/it'\''s done'");
    }

    #[test]
    fn test_install_stop_hook_preserves_other_keys() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".claude")).unwrap();
        std::fs::write(
            temp.path().join(SETTINGS_FILE),
            r#"{"permissions":{"allow":["Bash"]},"hooks":{"PreToolUse":[]}}"#,
        )
        .unwrap();

        let marker = PathBuf::from(DEFAULT_SIGNAL_FILE);
        let outcome = install_stop_hook(temp.path(), &marker, false).unwrap();
        assert_eq!(outcome, HookInstall::Updated);

        let content = std::fs::read_to_string(temp.path().join(SETTINGS_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["permissions"]["allow"][0], "Bash");
        assert!(json["hooks"]["PreToolUse"].is_array());
        assert!(json["hooks"]["Stop"].is_array());
    }

    #[test]
    fn test_install_stop_hook_respects_existing_hook() {
        let temp = TempDir::new().unwrap();
        let marker = PathBuf::from(DEFAULT_SIGNAL_FILE);
        install_stop_hook(temp.path(), &marker, false).unwrap();

        assert_eq!(
            install_stop_hook(temp.path(), &marker, false).unwrap(),
            HookInstall::AlreadyPresent
        );
        assert_eq!(
            install_stop_hook(temp.path(), &marker, true).unwrap(),
            HookInstall::Updated
        );
    }
}
