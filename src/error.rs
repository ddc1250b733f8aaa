//! Custom error types for autodev.
//!
//! Every failure the command lifecycle can produce is a variant of
//! [`AutodevError`]. The retry layer does not match on variants directly; it
//! asks for the coarse [`ErrorKind`] and consults the configured retryable set.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for autodev operations
#[derive(Error, Debug)]
pub enum AutodevError {
    // =========================================================================
    // Command Lifecycle Errors
    // =========================================================================
    /// The external agent could not be spawned or communicated with
    #[error("[COMMAND_EXECUTION]: {message} - Command: {command}")]
    Execution { command: String, message: String },

    /// The completion marker never appeared
    #[error("[COMMAND_TIMEOUT]: marker {} did not appear within {:.1}s", marker.display(), elapsed.as_secs_f64())]
    Timeout { marker: PathBuf, elapsed: Duration },

    /// A marker timeout attributed to the command that was waiting on it
    #[error("[COMMAND_TIMEOUT]: timed out waiting for completion signal - Command: {command}")]
    CommandTimeout {
        command: String,
        #[source]
        source: Box<AutodevError>,
    },

    /// The agent's output was not the expected JSON payload
    #[error("[JSON_PARSE]: {message} - Command: {command}")]
    Parse { command: String, message: String },

    /// Malformed usage-limit reset information from the agent
    #[error("[VALIDATION]: {message}{}", command_suffix(command.as_deref()))]
    Validation {
        message: String,
        command: Option<String>,
    },

    /// The retry budget ran out; carries the last observed error
    #[error("{source} (gave up after {retries} retries)")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<AutodevError>,
    },

    // =========================================================================
    // Environment Errors
    // =========================================================================
    /// Missing required file
    #[error("Missing required file: {}", path.display())]
    MissingFile { path: PathBuf },

    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    /// Failed to load or validate configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by the retry scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Spawn or pipe failure talking to the agent.
    Execution,
    /// Completion marker wait timed out.
    Timeout,
    /// Output was not parseable.
    Parse,
    /// Corrupted input from the agent (bad timezone, bad hour).
    Validation,
    /// Configuration or missing prerequisites.
    Config,
    /// Local filesystem trouble.
    Io,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Io => "io",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl AutodevError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create an execution error
    pub fn execution(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            command: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Attach the command name to a bare marker timeout or an untagged
    /// validation error.
    #[must_use]
    pub fn with_command(self, command: &str) -> Self {
        match self {
            Self::Timeout { .. } => Self::CommandTimeout {
                command: command.to_string(),
                source: Box::new(self),
            },
            Self::Validation {
                message,
                command: None,
            } => Self::Validation {
                message,
                command: Some(command.to_string()),
            },
            other => other,
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Coarse kind of this error.
    ///
    /// Wrappers report the kind of the error they wrap, so an exhausted retry
    /// of a timeout is still a timeout.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CommandTimeout { source, .. } | Self::RetriesExhausted { source, .. } => {
                source.kind()
            }
            Self::Parse { .. } | Self::Json(_) => ErrorKind::Parse,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::MissingFile { .. } | Self::MissingTool { .. } | Self::Config { .. } => {
                ErrorKind::Config
            }
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Check if this error is a timeout waiting for the completion marker
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Parse-shape errors can never be fixed by trying again.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self.kind(), ErrorKind::Parse | ErrorKind::Validation)
    }

    /// Get error code for exit status
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingFile { .. } => 1,
            Self::MissingTool { .. } => 6,
            Self::Config { .. } => 7,
            _ => match self.kind() {
                ErrorKind::Parse => 3,
                ErrorKind::Validation => 4,
                _ => 2,
            },
        }
    }
}

fn command_suffix(command: Option<&str>) -> String {
    command.map(|c| format!(" - Command: {c}")).unwrap_or_default()
}

/// Type alias for autodev results
pub type Result<T> = std::result::Result<T, AutodevError>;
