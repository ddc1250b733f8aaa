//! Command lifecycle and orchestration.
//!
//! This module contains the core automation loop components:
//!
//! - [`manager`] - Loop manager that runs the TDD and refactor cycles
//! - [`executor`] - One agent command to completion (marker wait, usage limits, retries)
//! - [`retry`] - Exponential backoff with jitter
//! - [`circuit_breaker`] - Rejects commands after repeated failures
//! - [`signal`] - Completion marker polling
//! - [`usage_limit`] - Usage-limit detection and reset-time arithmetic
//! - [`task_tracker`] - Task list reading and the fix-attempt limit
//! - [`status`] - Status files reported by the agent
//! - [`state`] - Orchestration states, commands and statuses
//! - [`operations`] - Real implementations of testable traits
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────┐     ┌────────────────┐
//! │ LoopManager  │────>│ CommandExecutor │────>│ RetryScheduler │
//! └──────────────┘     └─────────────────┘     └────────────────┘
//!        │                      │                      │
//!        v                      v                      v
//! ┌──────────────┐     ┌─────────────────┐     ┌────────────────┐
//! │ TaskTracker  │     │ SignalWaiter    │     │ AgentProcess   │
//! │ StatusFiles  │     │ UsageLimit      │     │                │
//! └──────────────┘     └─────────────────┘     └────────────────┘
//! ```

pub mod circuit_breaker;
pub mod executor;
pub mod manager;
pub mod operations;
pub mod retry;
pub mod signal;
pub mod state;
pub mod status;
pub mod task_tracker;
pub mod usage_limit;

// Re-exports for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use executor::CommandExecutor;
pub use manager::{LoopDependencies, LoopManager, LoopManagerConfig};
pub use retry::{RetryConfig, RetryScheduler};
pub use signal::SignalWaiter;
pub use state::{AgentStatus, LoopState, OrchestrationState, WorkflowCommand};
pub use status::StatusFileReader;
pub use task_tracker::TaskTracker;
pub use usage_limit::{UsageLimitInfo, UsageLimitResolver};
