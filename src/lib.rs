//! Autodev - Agent Workflow Orchestrator
//!
//! Drives the Claude Code CLI through a test-driven development workflow:
//! every open task in `Implementation Plan.md` goes through
//! `clear -> continue -> validate -> (correct)* -> update`, then the project
//! goes through `checkin -> refactor -> (finalize)*` until no refactoring is
//! left.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`r#loop`] - Command lifecycle (executor, retry, marker wait, usage limits) and the state machine
//! - [`config`] - Configuration loading, validation and Stop-hook installation
//! - [`error`] - Custom error types and exit codes
//! - [`analytics`] - Observers for workflow events and metrics
//! - [`session`] - Snapshot persistence for graceful shutdown
//! - [`testing`] - Testing infrastructure (traits, mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use autodev::config::WorkflowConfig;
//! use autodev::r#loop::{LoopManager, LoopManagerConfig};
//! use autodev::analytics::TracingObserver;
//! use std::sync::Arc;
//!
//! let workflow = WorkflowConfig::load(&project_dir)?;
//! let mut manager = LoopManager::new(
//!     LoopManagerConfig::new(project_dir, workflow),
//!     Arc::new(TracingObserver),
//! )?;
//! manager.run().await?;
//! ```

pub mod analytics;
pub mod config;
pub mod error;
pub mod r#loop;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use error::{AutodevError, ErrorKind, Result};

// Re-export config types
pub use config::{check_prerequisites, install_stop_hook, HookInstall, WorkflowConfig};

// Re-export loop types
pub use r#loop::{
    AgentStatus, CircuitBreakerConfig, CommandExecutor, LoopDependencies, LoopManager,
    LoopManagerConfig, LoopState, OrchestrationState, RetryConfig, RetryScheduler, SignalWaiter,
    TaskTracker, UsageLimitInfo, UsageLimitResolver, WorkflowCommand,
};

// Re-export analytics types
pub use analytics::{EventLog, MetricsCollector, NoopObserver, Observer, ObserverSet, TracingObserver, WorkflowEvent};

// Re-export testing types for convenience
pub use testing::{AgentOutput, AgentProcess, Sleeper, StatusSource};

// TestProject is only available in test builds
#[cfg(test)]
pub use testing::TestProject;
