/*!
 * Process Payloads
 *
 * The work a handle performs each poll: either a capability object
 * implementing [`Task`] or a plain callback. Capabilities are captured once
 * into a [`PayloadProfile`] when the payload is installed, never re-queried
 * on the hot path.
 */

use super::types::StopReason;
use crate::core::id::ProcessId;
use crate::core::types::{Context, ContextMask};
use std::fmt;
use std::time::Duration;

/// Outcome of one poll
#[derive(Debug)]
pub enum Poll {
    /// Not finished; poll again next tick
    Continue,
    /// Finished; eligible for completion once the gate agrees
    Done,
    /// Failed; the process stops and its cleanup still runs
    Failed(anyhow::Error),
}

impl Poll {
    /// Map "keep looping" style predicates onto a poll outcome
    #[inline]
    pub fn keep_going(keep_going: bool) -> Self {
        if keep_going {
            Poll::Continue
        } else {
            Poll::Done
        }
    }

    #[inline]
    pub fn is_continue(&self) -> bool {
        matches!(self, Poll::Continue)
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Poll::Done)
    }

    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Poll::Failed(err.into())
    }
}

impl<E: Into<anyhow::Error>> From<Result<bool, E>> for Poll {
    fn from(result: Result<bool, E>) -> Self {
        match result {
            Ok(keep_going) => Poll::keep_going(keep_going),
            Err(err) => Poll::Failed(err.into()),
        }
    }
}

/// Per-poll view handed to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub id: ProcessId,
    pub context: Context,
    /// Time since this process's previous poll in this context
    pub delta: Duration,
    /// Time accumulated by this process in this context
    pub elapsed: Duration,
    /// Tick counter of the owning unit
    pub frame: u64,
}

/// Capability object contract
///
/// `contexts` is read once at submission to decide which units the process
/// joins. The same `poll` serves every declared context; `tick.context` says
/// which loop is calling.
pub trait Task: Send + 'static {
    /// Contexts this task can run in
    fn contexts(&self) -> ContextMask;

    /// Perform one slice of work
    fn poll(&mut self, tick: &Tick) -> Poll;

    /// Gating predicate checked while the process waits in `Added`
    fn can_start(&mut self, _context: Context) -> bool {
        true
    }

    /// Completion gate checked after a `Done` poll
    fn can_complete(&mut self, _context: Context) -> bool {
        true
    }

    /// Returning false collapses the process on its next poll
    fn is_alive(&self) -> bool {
        true
    }

    /// Cleanup hook, invoked exactly once at eviction
    fn on_stop(&mut self, _reason: StopReason) {}
}

/// Plain callback payload
pub type Callback = Box<dyn FnMut(&Tick) -> Poll + Send>;

/// Kind of payload, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Empty,
    Task,
    Callback,
}

/// Capabilities captured from a payload when it is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadProfile {
    pub kind: PayloadKind,
    /// `None` means unconstrained
    pub declared: Option<ContextMask>,
}

impl Default for PayloadProfile {
    fn default() -> Self {
        Self {
            kind: PayloadKind::Empty,
            declared: None,
        }
    }
}

/// Work attached to a handle
#[derive(Default)]
pub enum Payload {
    /// Nothing beyond an attached job
    #[default]
    Empty,
    Task(Box<dyn Task>),
    Callback(Callback),
}

impl Payload {
    pub fn task<T: Task>(task: T) -> Self {
        Payload::Task(Box::new(task))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&Tick) -> Poll + Send + 'static,
    {
        Payload::Callback(Box::new(f))
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Empty => PayloadKind::Empty,
            Payload::Task(_) => PayloadKind::Task,
            Payload::Callback(_) => PayloadKind::Callback,
        }
    }

    /// Contexts the payload itself declares; `None` means unconstrained
    pub fn declared_contexts(&self) -> Option<ContextMask> {
        match self {
            Payload::Task(task) => Some(task.contexts()),
            Payload::Empty | Payload::Callback(_) => None,
        }
    }

    pub fn profile(&self) -> PayloadProfile {
        PayloadProfile {
            kind: self.kind(),
            declared: self.declared_contexts(),
        }
    }

    #[inline]
    pub fn poll(&mut self, tick: &Tick) -> Poll {
        match self {
            Payload::Empty => Poll::Done,
            Payload::Task(task) => task.poll(tick),
            Payload::Callback(f) => f(tick),
        }
    }

    #[inline]
    pub fn can_start(&mut self, context: Context) -> bool {
        match self {
            Payload::Task(task) => task.can_start(context),
            _ => true,
        }
    }

    #[inline]
    pub fn can_complete(&mut self, context: Context) -> bool {
        match self {
            Payload::Task(task) => task.can_complete(context),
            _ => true,
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        match self {
            Payload::Task(task) => task.is_alive(),
            _ => true,
        }
    }

    pub fn on_stop(&mut self, reason: StopReason) {
        if let Payload::Task(task) = self {
            task.on_stop(reason);
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Payload::Empty"),
            Payload::Task(task) => write!(f, "Payload::Task({})", task.contexts()),
            Payload::Callback(_) => f.write_str("Payload::Callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown(u32);

    impl Task for Countdown {
        fn contexts(&self) -> ContextMask {
            Context::Update | Context::FixedUpdate
        }

        fn poll(&mut self, _tick: &Tick) -> Poll {
            self.0 = self.0.saturating_sub(1);
            Poll::keep_going(self.0 > 0)
        }
    }

    fn tick() -> Tick {
        Tick {
            id: ProcessId(1),
            context: Context::Update,
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame: 0,
        }
    }

    #[test]
    fn test_task_payload() {
        let mut payload = Payload::task(Countdown(2));
        assert_eq!(payload.kind(), PayloadKind::Task);
        assert_eq!(
            payload.declared_contexts(),
            Some(Context::Update | Context::FixedUpdate)
        );
        assert!(payload.poll(&tick()).is_continue());
        assert!(payload.poll(&tick()).is_done());
    }

    #[test]
    fn test_callback_payload_unconstrained() {
        let mut payload = Payload::callback(|_| Poll::Done);
        assert_eq!(payload.declared_contexts(), None);
        assert_eq!(payload.profile().kind, PayloadKind::Callback);
        assert!(payload.can_start(Context::Thread));
        assert!(payload.poll(&tick()).is_done());
    }

    #[test]
    fn test_result_conversion() {
        let ok: Result<bool, std::io::Error> = Ok(true);
        assert!(Poll::from(ok).is_continue());

        let err: Result<bool, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(matches!(Poll::from(err), Poll::Failed(_)));
    }

    #[test]
    fn test_empty_payload_is_done() {
        let mut payload = Payload::Empty;
        assert!(payload.poll(&tick()).is_done());
        assert!(payload.is_alive());
    }
}
