/*!
 * Process Types
 * Common types for process handles
 */

use super::payload::PayloadKind;
use super::state::ProcessState;
use crate::core::id::ProcessId;
use crate::core::name::ProcessName;
use crate::core::serde::is_none;
use crate::core::types::ContextMask;
use serde::{Deserialize, Serialize};

/// Why a process left the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Payload reported done and the completion gate accepted it
    Completed,
    /// Payload returned `Poll::Failed` or panicked
    Failed,
    /// Backing capability stopped being alive
    Collapsed,
    /// `Scheduler::stop` or `Scheduler::clear`
    Cancelled,
    /// Scheduler torn down with the process still scheduled
    Shutdown,
}

impl StopReason {
    /// Terminal state a process lands in for this reason
    pub const fn terminal_state(self) -> ProcessState {
        match self {
            StopReason::Completed | StopReason::Failed | StopReason::Collapsed => {
                ProcessState::Stopped
            }
            StopReason::Cancelled | StopReason::Shutdown => ProcessState::Removed,
        }
    }
}

/// Behavior flags frozen at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessFlags {
    /// Time-sliced: update work is routed to the async unit
    pub deferred: bool,
    /// Sample the scaled clock instead of the unscaled one
    pub uses_time_scale: bool,
}

impl ProcessFlags {
    pub const fn new() -> Self {
        Self {
            deferred: false,
            uses_time_scale: true,
        }
    }
}

impl Default for ProcessFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of a handle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessInfo {
    pub id: ProcessId,
    #[serde(skip_serializing_if = "is_none")]
    pub name: Option<ProcessName>,
    pub state: ProcessState,
    pub contexts: ContextMask,
    pub payload: PayloadKind,
    pub flags: ProcessFlags,
    pub parallel_job: bool,
    #[serde(skip_serializing_if = "is_none")]
    pub stop_reason: Option<StopReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_terminal_state() {
        assert_eq!(StopReason::Completed.terminal_state(), ProcessState::Stopped);
        assert_eq!(StopReason::Failed.terminal_state(), ProcessState::Stopped);
        assert_eq!(StopReason::Cancelled.terminal_state(), ProcessState::Removed);
        assert_eq!(StopReason::Shutdown.terminal_state(), ProcessState::Removed);
    }

    #[test]
    fn test_default_flags_use_time_scale() {
        assert!(ProcessFlags::new().uses_time_scale);
        assert!(!ProcessFlags::new().deferred);
    }
}
