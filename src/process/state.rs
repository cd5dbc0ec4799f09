/*!
 * Process State Machine
 *
 * Idle -> Ready -> Added -> Started -> Running -> (Stopped | Removed)
 *
 * `Added` and `Started` are one-shot states emitted the tick a slot goes live.
 * `Stopped` means the process finished on its own (completed, failed or
 * collapsed); `Removed` means it was cancelled from outside. Both are terminal
 * and only lead back to `Idle` through an explicit restart.
 */

use crate::core::errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a process handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProcessState {
    /// Constructed, not submitted
    Idle = 0,
    /// Accepted by the scheduler, not yet placed by any unit
    Ready = 1,
    /// Holds a slot; waiting on its start gate
    Added = 2,
    /// Start gate passed this tick
    Started = 3,
    /// Polled every tick
    Running = 4,
    /// Finished on its own
    Stopped = 5,
    /// Cancelled from outside
    Removed = 6,
}

impl ProcessState {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Removed)
    }

    /// States in which a per-context slot address is meaningful
    #[inline]
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            ProcessState::Added | ProcessState::Started | ProcessState::Running
        )
    }

    /// Submitted and not yet terminal
    #[inline]
    pub const fn is_scheduled(self) -> bool {
        matches!(self, ProcessState::Ready) || self.is_live()
    }

    /// Legal edges of the lifecycle graph
    pub const fn can_transition_to(self, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, to),
            (Idle, Ready)
                | (Ready, Added)
                | (Ready, Stopped)
                | (Ready, Removed)
                | (Added, Started)
                | (Added, Stopped)
                | (Added, Removed)
                | (Started, Running)
                | (Started, Stopped)
                | (Started, Removed)
                | (Running, Stopped)
                | (Running, Removed)
                | (Stopped, Idle)
                | (Removed, Idle)
        )
    }

    const fn from_u8(raw: u8) -> ProcessState {
        match raw {
            0 => ProcessState::Idle,
            1 => ProcessState::Ready,
            2 => ProcessState::Added,
            3 => ProcessState::Started,
            4 => ProcessState::Running,
            5 => ProcessState::Stopped,
            _ => ProcessState::Removed,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Idle => "idle",
            ProcessState::Ready => "ready",
            ProcessState::Added => "added",
            ProcessState::Started => "started",
            ProcessState::Running => "running",
            ProcessState::Stopped => "stopped",
            ProcessState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Lock-free state cell shared between the facade and every owning unit
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub const fn new(state: ProcessState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline(always)]
    pub fn load(&self) -> ProcessState {
        ProcessState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to` if the cell still holds `from`
    ///
    /// Returns the observed state on failure so callers can tell a lost race
    /// from an illegal edge.
    pub fn transition(&self, from: ProcessState, to: ProcessState) -> SchedulerResult<()> {
        if !from.can_transition_to(to) {
            return Err(SchedulerError::InvalidStateTransition { from, to });
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| SchedulerError::InvalidStateTransition {
                from: ProcessState::from_u8(actual),
                to,
            })
    }

    /// Move from whatever the current state is to `to`, if that edge is legal
    ///
    /// Returns the state that was replaced.
    pub fn advance(&self, to: ProcessState) -> SchedulerResult<ProcessState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = ProcessState::from_u8(current);
            if !from.can_transition_to(to) {
                return Err(SchedulerError::InvalidStateTransition { from, to });
            }
            match self.0.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }
}
