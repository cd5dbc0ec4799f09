/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::types::{Context, ContextMask};
use crate::process::ProcessState;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scheduler operation result
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler errors with serialization support
///
/// Only submission-time and configuration failures surface here. Failures
/// raised while a process is being polled are contained inside the tick.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SchedulerError {
    #[error("Process has no payload and no job attached")]
    #[diagnostic(
        code(scheduler::empty_payload),
        help("Attach a task, a callback, or a job before starting the process.")
    )]
    EmptyPayload,

    #[error("Process resolves to no execution context")]
    #[diagnostic(
        code(scheduler::empty_context_mask),
        help("A task must declare at least one context in Task::contexts().")
    )]
    EmptyContextMask,

    #[error("Context {context} is not supported by this payload (supports: {supported})")]
    #[diagnostic(
        code(scheduler::unsupported_context),
        help("Restrict the requested contexts to those the payload declares.")
    )]
    UnsupportedContext {
        context: Context,
        supported: ContextMask,
    },

    #[error("Execution unit {context} is at capacity ({capacity} processes)")]
    #[diagnostic(
        code(scheduler::capacity_exceeded),
        help("Raise UnitConfig::capacity or wait for running processes to finish.")
    )]
    CapacityExceeded { context: Context, capacity: usize },

    #[error("Request queue for {context} is full ({capacity} pending)")]
    #[diagnostic(
        code(scheduler::queue_full),
        help("The unit is not being ticked fast enough to drain its queue.")
    )]
    QueueFull { context: Context, capacity: usize },

    #[error("Process is still being evicted from another context")]
    #[diagnostic(
        code(scheduler::still_evicting),
        help("Retry once every unit that held the process has ticked.")
    )]
    StillEvicting,

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    #[diagnostic(code(scheduler::invalid_state_transition))]
    InvalidStateTransition { from: ProcessState, to: ProcessState },

    #[error("Scheduler is shutting down")]
    #[diagnostic(
        code(scheduler::shutting_down),
        help("No new work is accepted after Scheduler::shutdown.")
    )]
    ShuttingDown,

    #[error("Failed to spawn worker thread: {0}")]
    #[diagnostic(code(scheduler::worker_spawn))]
    WorkerSpawn(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(scheduler::invalid_config),
        help("Check capacities, batch policies and worker limits.")
    )]
    Config(String),
}

impl SchedulerError {
    /// Capacity errors are retryable once the unit drains
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            SchedulerError::CapacityExceeded { .. } | SchedulerError::QueueFull { .. }
        )
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        SchedulerError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Config(err.to_string())
    }
}
