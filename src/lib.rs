/*!
 * Tickflow Library
 * Cooperative multi-context process scheduler exposed as a library
 */

pub mod core;
pub mod monitoring;
pub mod process;
pub mod scheduler;

// Re-exports
pub use crate::core::errors::{SchedulerError, SchedulerResult};
pub use crate::core::id::ProcessId;
pub use crate::core::name::ProcessName;
pub use crate::core::types::{Context, ContextMask, Slot};
pub use monitoring::{init_tracing, SchedulerStats, UnitStatsSnapshot};
pub use process::{
    JobDriver, JobToken, JobWork, Payload, Poll, ProcessBuilder, ProcessHandle, ProcessInfo,
    ProcessState, StopReason, Task, ThreadJobDriver, Tick,
};
pub use scheduler::{
    BatchPolicy, FrameTime, Scheduler, SchedulerBuilder, SchedulerConfig, TickReport, UnitConfig,
};
