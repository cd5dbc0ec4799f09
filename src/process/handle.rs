/*!
 * Process Handle
 *
 * One schedulable unit of work. The handle is shared (`Arc`) between the
 * registry, the caller and every execution unit that holds it. Fields that
 * units read on the hot path are atomics. Two locks cover the rest:
 *
 * - `body`: timing, flags and captured capabilities. Held only briefly and
 *   never while user code runs, so queries and submissions may call in from
 *   a poll or a stop hook.
 * - `work`: payload, job and stop hook. Held across a poll and across
 *   eviction cleanup; only execution units take it.
 *
 * Lock order is `work` then `body`.
 *
 * Per-context slot addresses are written only by the unit that owns that
 * context (single writer per context).
 */

use super::job::{JobBinding, JobDriver, JobWork};
use super::payload::{Payload, PayloadKind, PayloadProfile, Poll, Task, Tick};
use super::state::{AtomicState, ProcessState};
use super::timing::TimingTable;
use super::types::{ProcessFlags, ProcessInfo, StopReason};
use crate::core::id::{IdGenerator, ProcessId, ProcessIdGenerator};
use crate::core::name::ProcessName;
use crate::core::types::{Context, ContextMask, Slot, CONTEXT_COUNT};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicIsize, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::warn;

const UNALLOCATED: isize = -1;
const NO_WORKER: usize = usize::MAX;
const NO_REASON: u8 = 0;

/// Hook run once at eviction with the reason the process left
pub type StopHook = Box<dyn FnMut(StopReason) + Send>;

fn ids() -> &'static ProcessIdGenerator {
    static IDS: OnceLock<ProcessIdGenerator> = OnceLock::new();
    IDS.get_or_init(ProcessIdGenerator::default_start)
}

fn encode_reason(reason: StopReason) -> u8 {
    match reason {
        StopReason::Completed => 1,
        StopReason::Failed => 2,
        StopReason::Collapsed => 3,
        StopReason::Cancelled => 4,
        StopReason::Shutdown => 5,
    }
}

fn decode_reason(raw: u8) -> Option<StopReason> {
    match raw {
        1 => Some(StopReason::Completed),
        2 => Some(StopReason::Failed),
        3 => Some(StopReason::Collapsed),
        4 => Some(StopReason::Cancelled),
        5 => Some(StopReason::Shutdown),
        _ => None,
    }
}

/// Result of a unit letting go of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Leave {
    /// The handle was not joined to this context (already left)
    NotMember,
    /// Other contexts still hold the handle
    Remaining,
    /// This was the last context; the caller must evict
    Last,
}

/// Bookkeeping guarded by the short-held lock
pub(crate) struct HandleBody {
    pub timing: TimingTable,
    pub flags: ProcessFlags,
    pub requested: ContextMask,
    pub profile: PayloadProfile,
    pub has_job: bool,
}

impl HandleBody {
    fn empty() -> Self {
        Self {
            timing: TimingTable::default(),
            flags: ProcessFlags::new(),
            requested: ContextMask::EMPTY,
            profile: PayloadProfile::default(),
            has_job: false,
        }
    }
}

/// User code, guarded by the lock held across polls and cleanup
#[derive(Default)]
pub(crate) struct HandleWork {
    pub payload: Payload,
    pub job: Option<JobBinding>,
    pub on_stop: Option<StopHook>,
}

/// Shared handle record
pub(crate) struct HandleCore {
    id: AtomicU64,
    name: RwLock<Option<ProcessName>>,
    state: AtomicState,
    mask: AtomicU8,
    joined: AtomicU8,
    addresses: [AtomicIsize; CONTEXT_COUNT],
    worker: AtomicUsize,
    generation: AtomicU32,
    cancel: AtomicU8,
    stop_reason: AtomicU8,
    body: Mutex<HandleBody>,
    work: Mutex<HandleWork>,
}

impl HandleCore {
    pub(crate) fn new() -> Self {
        Self {
            id: AtomicU64::new(ids().next().0),
            name: RwLock::new(None),
            state: AtomicState::new(ProcessState::Idle),
            mask: AtomicU8::new(0),
            joined: AtomicU8::new(0),
            addresses: std::array::from_fn(|_| AtomicIsize::new(UNALLOCATED)),
            worker: AtomicUsize::new(NO_WORKER),
            generation: AtomicU32::new(0),
            cancel: AtomicU8::new(NO_REASON),
            stop_reason: AtomicU8::new(NO_REASON),
            body: Mutex::new(HandleBody::empty()),
            work: Mutex::new(HandleWork::default()),
        }
    }

    #[inline(always)]
    pub(crate) fn id(&self) -> ProcessId {
        ProcessId(self.id.load(Ordering::Relaxed))
    }

    pub(crate) fn name(&self) -> Option<ProcessName> {
        self.name.read().clone()
    }

    pub(crate) fn name_matches(&self, name: &str) -> bool {
        self.name.read().as_ref().is_some_and(|n| n == name)
    }

    #[inline(always)]
    pub(crate) fn state(&self) -> ProcessState {
        self.state.load()
    }

    #[inline(always)]
    pub(crate) fn state_cell(&self) -> &AtomicState {
        &self.state
    }

    #[inline(always)]
    pub(crate) fn mask(&self) -> ContextMask {
        ContextMask::from_bits_truncate(self.mask.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn body(&self) -> MutexGuard<'_, HandleBody> {
        self.body.lock()
    }

    #[inline(always)]
    pub(crate) fn work(&self) -> MutexGuard<'_, HandleWork> {
        self.work.lock()
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    /// Raw slot bookkeeping, regardless of state
    #[inline(always)]
    pub(crate) fn raw_address(&self, context: Context) -> Option<Slot> {
        let raw = self.addresses[context.index()].load(Ordering::Acquire);
        usize::try_from(raw).ok()
    }

    #[inline(always)]
    pub(crate) fn set_raw_address(&self, context: Context, slot: Option<Slot>) {
        let raw = slot.map_or(UNALLOCATED, |s| s as isize);
        self.addresses[context.index()].store(raw, Ordering::Release);
    }

    /// Slot address as seen from outside: valid only while live in that context
    pub(crate) fn address(&self, context: Context) -> Option<Slot> {
        if !self.state().is_live() || !self.mask().contains(context) {
            return None;
        }
        self.raw_address(context)
    }

    // ------------------------------------------------------------------
    // Context membership
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn is_joined(&self, context: Context) -> bool {
        self.joined.load(Ordering::Acquire) & context.bit() != 0
    }

    #[inline]
    pub(crate) fn joined(&self) -> ContextMask {
        ContextMask::from_bits_truncate(self.joined.load(Ordering::Acquire))
    }

    /// Drop this context from the joined set; exactly one caller sees `Last`
    pub(crate) fn leave(&self, context: Context) -> Leave {
        let bit = context.bit();
        let prev = self.joined.fetch_and(!bit, Ordering::AcqRel);
        if prev & bit == 0 {
            Leave::NotMember
        } else if prev & !bit == 0 {
            Leave::Last
        } else {
            Leave::Remaining
        }
    }

    pub(crate) fn worker(&self) -> Option<usize> {
        match self.worker.load(Ordering::Acquire) {
            NO_WORKER => None,
            index => Some(index),
        }
    }

    pub(crate) fn set_worker(&self, worker: Option<usize>) {
        self.worker
            .store(worker.unwrap_or(NO_WORKER), Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Cancellation and stop bookkeeping
    // ------------------------------------------------------------------

    #[inline(always)]
    pub(crate) fn cancel_reason(&self) -> Option<StopReason> {
        decode_reason(self.cancel.load(Ordering::Acquire))
    }

    /// First cancellation wins; returns false if one was already pending
    pub(crate) fn request_cancel(&self, reason: StopReason) -> bool {
        self.cancel
            .compare_exchange(
                NO_REASON,
                encode_reason(reason),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        decode_reason(self.stop_reason.load(Ordering::Acquire))
    }

    /// Record why the process stopped and move it to the matching terminal state
    ///
    /// The first recorded reason wins; later calls return it unchanged.
    pub(crate) fn record_stop(&self, reason: StopReason) -> StopReason {
        let recorded = match self.stop_reason.compare_exchange(
            NO_REASON,
            encode_reason(reason),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => reason,
            Err(existing) => decode_reason(existing).unwrap_or(reason),
        };
        if !self.state().is_terminal() {
            // Losing this race means another context already terminated it
            let _ = self.state.advance(recorded.terminal_state());
        }
        recorded
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Terminal handles that every unit has released go back to `Idle`
    pub(crate) fn rewind(&self) -> bool {
        let state = self.state();
        if !state.is_terminal() || !self.joined().is_empty() {
            return false;
        }
        if self
            .state
            .transition(state, ProcessState::Idle)
            .is_err()
        {
            return false;
        }
        self.cancel.store(NO_REASON, Ordering::Release);
        self.stop_reason.store(NO_REASON, Ordering::Release);
        true
    }

    /// Claim an idle handle for a submission into `mask`
    ///
    /// Returns the new generation, or `None` if another submission won. A
    /// cancellation that lands between the claim and the first add drain is
    /// kept, so the unit drops the handle instead of running it.
    pub(crate) fn begin_submission(&self, mask: ContextMask) -> Option<u32> {
        self.state
            .transition(ProcessState::Idle, ProcessState::Ready)
            .ok()?;
        self.body().timing.reset_all();
        for address in &self.addresses {
            address.store(UNALLOCATED, Ordering::Release);
        }
        self.mask.store(mask.bits(), Ordering::Release);
        self.joined.store(mask.bits(), Ordering::Release);
        Some(self.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Fill a pooled or fresh record from a builder
    pub(crate) fn install(&self, builder: ProcessBuilder) {
        *self.name.write() = builder.name;
        {
            let mut body = self.body();
            body.flags = builder.flags;
            body.requested = builder.contexts;
            body.profile = builder.payload.profile();
            body.has_job = builder.job.is_some();
            body.timing.reset_all();
        }
        *self.work() = HandleWork {
            payload: builder.payload,
            job: builder.job,
            on_stop: builder.on_stop,
        };
    }

    /// Gate check and `Added -> Started -> Running`; returns true once running
    ///
    /// Takes the held `work` guard so the state read cannot go stale against
    /// another context polling the same handle.
    pub(crate) fn try_start(&self, work: &mut HandleWork, context: Context) -> bool {
        match self.state() {
            ProcessState::Added => {}
            state => return state == ProcessState::Running || state == ProcessState::Started,
        }
        if !work.payload.can_start(context) {
            return false;
        }
        if self
            .state
            .transition(ProcessState::Added, ProcessState::Started)
            .is_err()
        {
            // Another context started it first
            return self.state() == ProcessState::Running;
        }
        self.state
            .transition(ProcessState::Started, ProcessState::Running)
            .is_ok()
    }

    /// Run cleanup exactly once; called by the unit that saw `Leave::Last`
    ///
    /// Hooks may restart or query this handle: neither touches `work`. The
    /// stop is recorded under `work`, so a restart is polled only after the
    /// hooks return.
    pub(crate) fn evict(&self, fallback: StopReason) -> StopReason {
        let mut work = self.work();
        let work = &mut *work;
        let reason = self.record_stop(self.cancel_reason().unwrap_or(fallback));
        let cleanup = catch_unwind(AssertUnwindSafe(|| {
            // Finishes an in-flight job and readies it for a restart
            if let Some(job) = work.job.as_mut() {
                job.reset();
            }
            work.payload.on_stop(reason);
            if let Some(hook) = work.on_stop.as_mut() {
                hook(reason);
            }
        }));
        if cleanup.is_err() {
            warn!(id = %self.id(), "Cleanup hook panicked during eviction");
        }
        reason
    }

    /// Strip a fully evicted record so the pool can hand it out again
    pub(crate) fn scrub(&self) {
        *self.name.write() = None;
        *self.body() = HandleBody::empty();
        *self.work() = HandleWork::default();
        self.id.store(ids().next().0, Ordering::Relaxed);
        self.mask.store(0, Ordering::Release);
        self.joined.store(0, Ordering::Release);
        self.cancel.store(NO_REASON, Ordering::Release);
        self.stop_reason.store(NO_REASON, Ordering::Release);
        self.worker.store(NO_WORKER, Ordering::Release);
        for address in &self.addresses {
            address.store(UNALLOCATED, Ordering::Release);
        }
        // Only reachable for terminal records, so the edge is always legal
        let _ = self.state.advance(ProcessState::Idle);
    }

    pub(crate) fn info(&self) -> ProcessInfo {
        let body = self.body();
        ProcessInfo {
            id: self.id(),
            name: self.name(),
            state: self.state(),
            contexts: self.mask(),
            payload: body.profile.kind,
            flags: body.flags,
            parallel_job: body.has_job,
            stop_reason: self.stop_reason(),
        }
    }
}

// ============================================================================
// Public handle
// ============================================================================

/// Caller-facing reference to a scheduled (or schedulable) process
///
/// Cloning is cheap and every clone refers to the same process. A handle
/// that is still referenced by a caller is never recycled by the scheduler.
#[derive(Clone)]
pub struct ProcessHandle {
    pub(crate) core: Arc<HandleCore>,
}

impl ProcessHandle {
    pub fn builder() -> ProcessBuilder {
        ProcessBuilder::new()
    }

    pub(crate) fn from_core(core: Arc<HandleCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> ProcessId {
        self.core.id()
    }

    pub fn name(&self) -> Option<ProcessName> {
        self.core.name()
    }

    pub fn state(&self) -> ProcessState {
        self.core.state()
    }

    /// Contexts resolved at the last submission
    pub fn contexts(&self) -> ContextMask {
        self.core.mask()
    }

    /// Slot held in `context`; `None` unless live there
    pub fn address(&self, context: Context) -> Option<Slot> {
        self.core.address(context)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.core.stop_reason()
    }

    /// Time this process has accumulated in `context`
    pub fn elapsed(&self, context: Context) -> Duration {
        self.core.body().timing.get(context).elapsed()
    }

    /// Delta seen by the last poll in `context`
    pub fn delta(&self, context: Context) -> Duration {
        self.core.body().timing.get(context).delta()
    }

    pub fn flags(&self) -> ProcessFlags {
        self.core.body().flags
    }

    pub fn is_parallel_job(&self) -> bool {
        self.core.body().has_job
    }

    pub fn is_callback(&self) -> bool {
        self.core.body().profile.kind == PayloadKind::Callback
    }

    pub fn info(&self) -> ProcessInfo {
        self.core.info()
    }

    pub fn ptr_eq(&self, other: &ProcessHandle) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ProcessHandle {}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("contexts", &self.contexts())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configuration for a new process; frozen once submitted
#[must_use]
pub struct ProcessBuilder {
    name: Option<ProcessName>,
    contexts: ContextMask,
    payload: Payload,
    job: Option<JobBinding>,
    flags: ProcessFlags,
    on_stop: Option<StopHook>,
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            contexts: ContextMask::EMPTY,
            payload: Payload::Empty,
            job: None,
            flags: ProcessFlags::new(),
            on_stop: None,
        }
    }

    pub fn name(mut self, name: impl Into<ProcessName>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a context to run in
    pub fn context(mut self, context: Context) -> Self {
        self.contexts.insert(context);
        self
    }

    /// Replace the requested context set
    pub fn contexts(mut self, contexts: impl Into<ContextMask>) -> Self {
        self.contexts = contexts.into();
        self
    }

    pub fn task<T: Task>(mut self, task: T) -> Self {
        self.payload = Payload::task(task);
        self
    }

    pub fn callback<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Tick) -> Poll + Send + 'static,
    {
        self.payload = Payload::callback(f);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Drive a parallel job; the process completes once the job does
    pub fn job<F>(mut self, driver: Arc<dyn JobDriver>, work: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let work: JobWork = Arc::new(work);
        self.job = Some(JobBinding::new(driver, work));
        self
    }

    pub fn deferred(mut self, deferred: bool) -> Self {
        self.flags.deferred = deferred;
        self
    }

    pub fn uses_time_scale(mut self, uses_time_scale: bool) -> Self {
        self.flags.uses_time_scale = uses_time_scale;
        self
    }

    /// Hook run once when the process is evicted
    pub fn on_stop<F>(mut self, f: F) -> Self
    where
        F: FnMut(StopReason) + Send + 'static,
    {
        self.on_stop = Some(Box::new(f));
        self
    }

    /// Build an idle handle, to be started with `Scheduler::start`
    pub fn build(self) -> ProcessHandle {
        let core = HandleCore::new();
        core.install(self);
        ProcessHandle::from_core(Arc::new(core))
    }
}

impl Default for ProcessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_handle_is_idle_and_unallocated() {
        let handle = ProcessHandle::builder()
            .name("idle")
            .callback(|_| Poll::Done)
            .build();
        assert_eq!(handle.state(), ProcessState::Idle);
        assert_eq!(handle.name().unwrap(), "idle");
        assert!(handle.is_callback());
        for context in Context::ALL {
            assert_eq!(handle.address(context), None);
        }
    }

    #[test]
    fn test_address_requires_live_state_and_mask() {
        let core = HandleCore::new();
        core.begin_submission(ContextMask::single(Context::Update)).unwrap();
        core.set_raw_address(Context::Update, Some(3));

        // Ready is not live yet
        assert_eq!(core.address(Context::Update), None);
        core.state_cell()
            .transition(ProcessState::Ready, ProcessState::Added)
            .unwrap();
        assert_eq!(core.address(Context::Update), Some(3));

        // Raw bookkeeping in a context outside the mask never leaks
        core.set_raw_address(Context::Thread, Some(1));
        assert_eq!(core.address(Context::Thread), None);

        core.record_stop(StopReason::Completed);
        assert_eq!(core.address(Context::Update), None);
        assert_eq!(core.raw_address(Context::Update), Some(3));
    }

    #[test]
    fn test_leave_reports_last_exactly_once() {
        let core = HandleCore::new();
        core.begin_submission(Context::Update | Context::Thread).unwrap();

        assert_eq!(core.leave(Context::Thread), Leave::Remaining);
        assert_eq!(core.leave(Context::Thread), Leave::NotMember);
        assert_eq!(core.leave(Context::Update), Leave::Last);
        assert_eq!(core.leave(Context::Update), Leave::NotMember);
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let core = HandleCore::new();
        core.begin_submission(ContextMask::single(Context::Update)).unwrap();
        assert_eq!(core.record_stop(StopReason::Failed), StopReason::Failed);
        assert_eq!(core.record_stop(StopReason::Cancelled), StopReason::Failed);
        assert_eq!(core.state(), ProcessState::Stopped);
    }

    #[test]
    fn test_evict_runs_hooks_with_cancel_reason() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let handle = ProcessHandle::builder()
            .callback(|_| Poll::Continue)
            .on_stop(move |reason| {
                assert_eq!(reason, StopReason::Cancelled);
                h.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let core = &handle.core;
        core.begin_submission(ContextMask::single(Context::Update)).unwrap();
        assert!(core.request_cancel(StopReason::Cancelled));
        assert!(!core.request_cancel(StopReason::Shutdown));

        assert_eq!(core.evict(StopReason::Completed), StopReason::Cancelled);
        assert_eq!(core.state(), ProcessState::Removed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_hook_can_query_own_handle() {
        let me: Arc<OnceLock<ProcessHandle>> = Arc::default();
        let seen = Arc::new(Mutex::new(None));
        let (cell, sink) = (Arc::clone(&me), Arc::clone(&seen));
        let handle = ProcessHandle::builder()
            .callback(|_| Poll::Done)
            .on_stop(move |_| {
                if let Some(me) = cell.get() {
                    *sink.lock() = Some(me.info());
                }
            })
            .build();
        me.set(handle.clone()).unwrap();
        let core = &handle.core;
        core.begin_submission(ContextMask::single(Context::Update)).unwrap();
        assert_eq!(core.leave(Context::Update), Leave::Last);

        core.evict(StopReason::Completed);
        let info = seen.lock().take().unwrap();
        assert_eq!(info.state, ProcessState::Stopped);
        assert_eq!(info.payload, PayloadKind::Callback);
        assert_eq!(info.stop_reason, Some(StopReason::Completed));
    }

    #[test]
    fn test_rewind_requires_full_eviction() {
        let core = HandleCore::new();
        core.begin_submission(Context::Update | Context::FixedUpdate).unwrap();
        core.record_stop(StopReason::Completed);
        assert_eq!(core.leave(Context::Update), Leave::Remaining);
        assert!(!core.rewind());
        assert_eq!(core.leave(Context::FixedUpdate), Leave::Last);
        assert!(core.rewind());
        assert_eq!(core.state(), ProcessState::Idle);
    }

    #[test]
    fn test_scrub_assigns_fresh_identity() {
        let core = HandleCore::new();
        core.install(ProcessBuilder::new().name("old").callback(|_| Poll::Done));
        core.begin_submission(ContextMask::single(Context::Update)).unwrap();
        core.record_stop(StopReason::Completed);
        let old_id = core.id();

        core.scrub();
        assert_ne!(core.id(), old_id);
        assert_eq!(core.name(), None);
        assert_eq!(core.state(), ProcessState::Idle);
        assert_eq!(core.body().profile.kind, PayloadKind::Empty);
        assert_eq!(core.work().payload.kind(), PayloadKind::Empty);
    }
}
