/*!
 * Process Module
 * Process handles, their lifecycle and the work they carry
 */

pub mod handle;
pub mod job;
pub mod payload;
pub mod state;
pub mod timing;
pub mod types;

// Re-export for convenience
pub use handle::{ProcessBuilder, ProcessHandle, StopHook};
pub use job::{JobBinding, JobDriver, JobToken, JobWork, ThreadJobDriver};
pub use payload::{Callback, Payload, PayloadKind, PayloadProfile, Poll, Task, Tick};
pub use state::{AtomicState, ProcessState};
pub use timing::{ContextTiming, TimingTable};
pub use types::{ProcessFlags, ProcessInfo, StopReason};

pub(crate) use handle::{HandleCore, Leave};
