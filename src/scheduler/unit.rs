/*!
 * Execution Unit
 *
 * One per context instance. Owns the slot allocator and the clock for that
 * context and is ticked by exactly one thread: the host loop for frame
 * contexts, its worker for the thread context.
 *
 * Tick order:
 * 1. advance the clock
 * 2. early-out when both queues and the slot array are empty
 * 3. drain removals
 * 4. drain additions, starting each one whose gate passes
 * 5. poll the live window from the rotating cursor
 */

use super::clock::{FrameTime, UnitClock};
use super::config::{BatchPolicy, UnitConfig};
use super::queues::{Request, UnitQueues};
use super::registry::Registry;
use super::slots::SlotAllocator;
use crate::core::types::Context;
use crate::monitoring::{span_tick, UnitStats};
use crate::process::{HandleCore, JobBinding, Leave, Poll, ProcessState, StopReason, Tick};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ops::AddAssign;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub added: usize,
    pub removed: usize,
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub collapsed: usize,
    /// The time-sliced pass stopped before visiting the whole window
    pub budget_exhausted: bool,
    /// Nothing queued and nothing live; the tick returned early
    pub idle: bool,
}

impl TickReport {
    pub(crate) fn idle() -> Self {
        Self {
            idle: true,
            ..Self::default()
        }
    }

    /// Processes that reached a terminal state through their own poll
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.collapsed
    }
}

impl AddAssign for TickReport {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.removed += other.removed;
        self.polled += other.polled;
        self.completed += other.completed;
        self.failed += other.failed;
        self.collapsed += other.collapsed;
        self.budget_exhausted |= other.budget_exhausted;
        self.idle &= other.idle;
    }
}

/// Result of visiting one slot
enum Visit {
    /// Not polled: gated, cancelled pending removal, or outside the mask
    Skipped,
    Polled,
    Finished(StopReason),
    /// Terminated in another context; release locally
    Departed,
}

pub(crate) struct ExecutionUnit {
    context: Context,
    config: UnitConfig,
    slots: SlotAllocator<Arc<HandleCore>>,
    queues: Arc<UnitQueues>,
    registry: Arc<Registry>,
    stats: Arc<UnitStats>,
    clock: UnitClock,
    cursor: usize,
    frame: u64,
    finished: Vec<Arc<HandleCore>>,
}

impl ExecutionUnit {
    pub fn new(
        context: Context,
        worker: Option<usize>,
        config: UnitConfig,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            context,
            slots: SlotAllocator::new(context, config.capacity),
            queues: Arc::new(UnitQueues::new(context, &config)),
            stats: Arc::new(UnitStats::new(context, worker)),
            config,
            registry,
            clock: UnitClock::new(),
            cursor: 0,
            frame: 0,
            finished: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn queues(&self) -> &Arc<UnitQueues> {
        &self.queues
    }

    pub fn stats(&self) -> &Arc<UnitStats> {
        &self.stats
    }

    pub fn live(&self) -> usize {
        self.slots.count()
    }

    /// Tick with a step measured from the wall clock
    pub fn tick_wall(&mut self) -> TickReport {
        let time = self.clock.wall_frame();
        self.tick(time)
    }

    /// Run one tick with a host-supplied step
    pub fn tick(&mut self, time: FrameTime) -> TickReport {
        self.clock.advance(time);
        self.frame += 1;
        self.stats.inc_ticks();

        if self.queues.is_drained() && self.slots.is_empty() {
            return TickReport::idle();
        }

        let span = span_tick(self.context, self.frame);
        let _entered = span.enter();

        let mut report = TickReport::default();
        self.drain_removes(&mut report);
        let admitted_from = self.slots.pointer();
        self.drain_adds(&mut report);
        self.poll_window(admitted_from, &mut report);
        self.release_finished();

        self.stats.add_polls(report.polled);
        self.stats.set_live(self.slots.count());
        span.record(&report);
        report
    }

    fn drain_removes(&mut self, report: &mut TickReport) {
        if self.queues.pending_removes() == 0 {
            return;
        }
        for request in self.queues.take_removes(self.config.remove_batch) {
            // Issued for an earlier incarnation
            if !request.is_current() || request.handle.cancel_reason().is_none() {
                continue;
            }
            self.slots.remove(&request.handle);
            if self.depart(request.handle, StopReason::Cancelled) {
                report.removed += 1;
                self.stats.inc_removed();
            }
        }
    }

    fn drain_adds(&mut self, report: &mut TickReport) {
        if self.queues.pending_adds() == 0 {
            return;
        }
        for Request { handle, generation } in self.queues.take_adds(self.config.add_batch) {
            if handle.generation() != generation || !handle.is_joined(self.context) {
                continue;
            }
            if handle.cancel_reason().is_some() || handle.state().is_terminal() {
                if self.depart(handle, StopReason::Cancelled) {
                    report.removed += 1;
                    self.stats.inc_removed();
                }
                continue;
            }
            if let Err(rejected) = self.slots.add(Arc::clone(&handle)) {
                // Reservations bound the slot count, so this means bookkeeping drifted
                warn!(
                    id = %rejected.id(),
                    context = %self.context,
                    "No free slot for reserved process"
                );
                rejected.record_stop(StopReason::Failed);
                self.depart(rejected, StopReason::Failed);
                continue;
            }

            // Already live when another context added it first
            let _ = handle
                .state_cell()
                .transition(ProcessState::Ready, ProcessState::Added);
            {
                let mut body = handle.body();
                let now = self.clock.sample(body.flags.uses_time_scale);
                let timing = body.timing.get_mut(self.context);
                timing.reset();
                timing.sample(now);
            }
            report.added += 1;
            self.stats.inc_added();

            if handle.cancel_reason().is_none() {
                self.admit(&handle, report);
            }
        }
    }

    /// Consult the start gate of a freshly added handle
    fn admit(&self, handle: &HandleCore, report: &mut TickReport) {
        let mut work = handle.work();
        let gate = catch_unwind(AssertUnwindSafe(|| handle.try_start(&mut work, self.context)));
        if let Err(panic) = gate {
            warn!(
                id = %handle.id(),
                context = %self.context,
                panic = panic_message(&*panic),
                "Process panicked in its start gate"
            );
            handle.record_stop(StopReason::Failed);
            report.failed += 1;
            self.stats.inc_failed();
        }
    }

    /// Slots at or past `admitted_from` were added this tick and already gated
    fn poll_window(&mut self, admitted_from: usize, report: &mut TickReport) {
        let window = self.slots.pointer();
        if window == 0 {
            return;
        }
        let budget = self
            .config
            .time_budget
            .filter(|_| self.context.is_time_sliced());
        let started = Instant::now();
        let start = self.cursor % window;

        let mut visited = 0;
        while visited < window {
            let index = (start + visited) % window;
            visited += 1;

            if let Some(handle) = self.slots.get(index) {
                let gate_due = index < admitted_from;
                match visit(self.context, &self.clock, self.frame, handle, gate_due) {
                    Visit::Skipped => {}
                    Visit::Polled => report.polled += 1,
                    Visit::Finished(reason) => {
                        report.polled += 1;
                        match reason {
                            StopReason::Completed => {
                                report.completed += 1;
                                self.stats.inc_completed();
                            }
                            StopReason::Failed => {
                                report.failed += 1;
                                self.stats.inc_failed();
                            }
                            StopReason::Collapsed => {
                                report.collapsed += 1;
                                self.stats.inc_collapsed();
                            }
                            StopReason::Cancelled | StopReason::Shutdown => {}
                        }
                        self.finished.push(Arc::clone(handle));
                    }
                    Visit::Departed => self.finished.push(Arc::clone(handle)),
                }
            }

            if let Some(budget) = budget {
                if visited < window && started.elapsed() >= budget {
                    report.budget_exhausted = true;
                    self.stats.inc_budget_exhausted();
                    break;
                }
            }
        }
        self.cursor = (start + visited) % window;
    }

    /// Release handles that finished during the pass
    fn release_finished(&mut self) {
        let mut finished = std::mem::take(&mut self.finished);
        for handle in finished.drain(..) {
            self.slots.remove(&handle);
            self.depart(handle, StopReason::Completed);
        }
        self.finished = finished;
    }

    /// Leave this context; the last context out evicts
    ///
    /// Returns false if the handle had already left.
    fn depart(&mut self, handle: Arc<HandleCore>, fallback: StopReason) -> bool {
        match handle.leave(self.context) {
            Leave::NotMember => false,
            Leave::Remaining => {
                self.queues.release();
                true
            }
            Leave::Last => {
                self.queues.release();
                let reason = handle.evict(fallback);
                debug!(id = %handle.id(), context = %self.context, ?reason, "Process evicted");
                self.registry.release(handle);
                true
            }
        }
    }

    /// Tear down: every joined handle leaves with `reason`
    pub fn shutdown(&mut self, reason: StopReason) -> usize {
        let mut departed = 0;
        for request in self.queues.take_removes(BatchPolicy::All) {
            if request.is_current() {
                self.slots.remove(&request.handle);
                departed += usize::from(self.depart(request.handle, StopReason::Cancelled));
            }
        }
        for request in self.queues.take_adds(BatchPolicy::All) {
            if request.is_current() && request.handle.is_joined(self.context) {
                request.handle.request_cancel(reason);
                departed += usize::from(self.depart(request.handle, reason));
            }
        }
        for handle in self.slots.clear() {
            handle.request_cancel(reason);
            departed += usize::from(self.depart(handle, reason));
        }
        self.finished.clear();
        self.cursor = 0;
        self.stats.set_live(0);
        departed
    }
}

/// Poll one slotted handle
///
/// Runs, in order, the job extension, the payload, then the completion gate.
/// Panics and `Poll::Failed` are contained here. Only `work` is held while
/// user code runs, so the payload may query its own handle.
fn visit(
    context: Context,
    clock: &UnitClock,
    frame: u64,
    handle: &HandleCore,
    gate_due: bool,
) -> Visit {
    let state = handle.state();
    if state.is_terminal() {
        return Visit::Departed;
    }
    if handle.cancel_reason().is_some() || !handle.mask().contains(context) {
        return Visit::Skipped;
    }
    if !gate_due && state == ProcessState::Added {
        return Visit::Skipped;
    }

    let id = handle.id();
    let mut work = handle.work();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        if !handle.try_start(&mut work, context) {
            return None;
        }
        if !work.payload.is_alive() {
            return Some(Err(StopReason::Collapsed));
        }

        let tick = {
            let mut body = handle.body();
            let now = clock.sample(body.flags.uses_time_scale);
            let timing = body.timing.get_mut(context);
            timing.sample(now);
            Tick {
                id,
                context,
                delta: timing.delta(),
                elapsed: timing.elapsed(),
                frame,
            }
        };

        let job = work.job.as_mut().map_or(Poll::Done, JobBinding::poll);
        let own = work.payload.poll(&tick);
        Some(Ok(match (job, own) {
            (Poll::Failed(err), _) | (_, Poll::Failed(err)) => {
                warn!(%id, %context, error = %err, "Process poll failed");
                Some(StopReason::Failed)
            }
            (Poll::Done, Poll::Done) => work
                .payload
                .can_complete(context)
                .then_some(StopReason::Completed),
            _ => None,
        }))
    }));

    let reason = match outcome {
        Ok(None) => return Visit::Skipped,
        Ok(Some(Ok(None))) => return Visit::Polled,
        Ok(Some(Ok(Some(reason)))) => reason,
        Ok(Some(Err(reason))) => reason,
        Err(panic) => {
            warn!(%id, %context, panic = panic_message(&*panic), "Process panicked while polling");
            StopReason::Failed
        }
    };
    // Published before `work` drops so no other context polls past the decision
    let reason = handle.record_stop(reason);
    drop(work);
    Visit::Finished(reason)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ContextMask;
    use crate::process::{ProcessBuilder, Task};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn unit(context: Context, config: UnitConfig) -> ExecutionUnit {
        ExecutionUnit::new(context, None, config, Arc::new(Registry::new(8)))
    }

    /// Mimic the facade's submission path for a single context
    fn submit(unit: &ExecutionUnit, builder: ProcessBuilder) -> Arc<HandleCore> {
        let core = unit.registry.acquire();
        core.install(builder);
        unit.queues.try_reserve().unwrap();
        core.begin_submission(ContextMask::single(unit.context)).unwrap();
        unit.registry.insert(&core);
        unit.queues.push_add(Request::new(Arc::clone(&core)));
        core
    }

    fn cancel(unit: &ExecutionUnit, core: &Arc<HandleCore>) {
        assert!(core.request_cancel(StopReason::Cancelled));
        unit.queues.push_remove(Request::new(Arc::clone(core)));
    }

    fn frame() -> FrameTime {
        FrameTime::new(Duration::from_millis(16))
    }

    #[test]
    fn test_continue_twice_then_done() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let polls = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (p, s) = (Arc::clone(&polls), Arc::clone(&stops));
        let core = submit(
            &unit,
            ProcessBuilder::new()
                .callback(move |_| Poll::keep_going(p.fetch_add(1, Ordering::SeqCst) < 2))
                .on_stop(move |_| {
                    s.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let mut states = Vec::new();
        for _ in 0..3 {
            unit.tick(frame());
            states.push(core.state());
        }
        assert_eq!(
            states,
            vec![ProcessState::Running, ProcessState::Running, ProcessState::Stopped]
        );
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(core.stop_reason(), Some(StopReason::Completed));

        unit.tick(frame());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(unit.live(), 0);
    }

    #[test]
    fn test_first_poll_sees_zero_delta() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let deltas = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let d = Arc::clone(&deltas);
        submit(
            &unit,
            ProcessBuilder::new().callback(move |tick| {
                d.lock().push(tick.delta);
                Poll::Continue
            }),
        );

        unit.tick(frame());
        unit.tick(frame());
        assert_eq!(
            *deltas.lock(),
            vec![Duration::ZERO, Duration::from_millis(16)]
        );
    }

    #[test]
    fn test_cancel_takes_effect_next_tick() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let core = submit(&unit, ProcessBuilder::new().callback(|_| Poll::Continue));
        unit.tick(frame());
        assert_eq!(core.state(), ProcessState::Running);
        assert_eq!(core.address(Context::Update), Some(0));

        cancel(&unit, &core);
        assert_eq!(core.state(), ProcessState::Running);
        let report = unit.tick(frame());
        assert_eq!(report.removed, 1);
        assert_eq!(report.polled, 0);
        assert_eq!(core.state(), ProcessState::Removed);
        assert_eq!(core.address(Context::Update), None);
        assert_eq!(unit.queues.reserved(), 0);
    }

    #[test]
    fn test_cancel_before_add_never_polls() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let polls = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&polls);
        let core = submit(
            &unit,
            ProcessBuilder::new().callback(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                Poll::Continue
            }),
        );
        cancel(&unit, &core);

        unit.tick(frame());
        unit.tick(frame());
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert_eq!(core.state(), ProcessState::Removed);
        assert_eq!(unit.queues.reserved(), 0);
    }

    #[test]
    fn test_failures_are_contained() {
        let config = UnitConfig::new(8).with_add_batch(BatchPolicy::All);
        let mut unit = unit(Context::Update, config);
        let panicking = submit(
            &unit,
            ProcessBuilder::new().callback(|_| panic!("payload exploded")),
        );
        let failing = submit(
            &unit,
            ProcessBuilder::new().callback(|_| Poll::failed(anyhow::anyhow!("bad input"))),
        );
        let healthy = submit(&unit, ProcessBuilder::new().callback(|_| Poll::Continue));

        let report = unit.tick(frame());
        assert_eq!(report.failed, 2);
        assert_eq!(panicking.stop_reason(), Some(StopReason::Failed));
        assert_eq!(failing.state(), ProcessState::Stopped);
        assert_eq!(healthy.state(), ProcessState::Running);
        assert_eq!(unit.live(), 1);
        assert_eq!(healthy.raw_address(Context::Update), Some(0));
    }

    struct Gate {
        opens_after: usize,
        checks: usize,
        polls: Arc<AtomicUsize>,
    }

    impl Task for Gate {
        fn contexts(&self) -> ContextMask {
            ContextMask::single(Context::Update)
        }

        fn can_start(&mut self, _context: Context) -> bool {
            self.checks += 1;
            self.checks > self.opens_after
        }

        fn poll(&mut self, _tick: &Tick) -> Poll {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Poll::Continue
        }
    }

    #[test]
    fn test_gated_handle_waits_in_added() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let polls = Arc::new(AtomicUsize::new(0));
        let core = submit(
            &unit,
            ProcessBuilder::new().task(Gate {
                opens_after: 2,
                checks: 0,
                polls: Arc::clone(&polls),
            }),
        );

        unit.tick(frame());
        assert_eq!(core.state(), ProcessState::Added);
        assert_eq!(core.address(Context::Update), Some(0));
        unit.tick(frame());
        assert_eq!(core.state(), ProcessState::Added);
        unit.tick(frame());
        assert_eq!(core.state(), ProcessState::Running);
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    struct Fragile {
        alive: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Task for Fragile {
        fn contexts(&self) -> ContextMask {
            ContextMask::single(Context::Update)
        }

        fn poll(&mut self, _tick: &Tick) -> Poll {
            Poll::Continue
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_collapse_stops_process() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let alive = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let core = submit(
            &unit,
            ProcessBuilder::new().task(Fragile {
                alive: Arc::clone(&alive),
            }),
        );
        unit.tick(frame());
        alive.store(false, Ordering::SeqCst);
        let report = unit.tick(frame());
        assert_eq!(report.collapsed, 1);
        assert_eq!(core.stop_reason(), Some(StopReason::Collapsed));
        assert_eq!(core.state(), ProcessState::Stopped);
    }

    #[test]
    fn test_add_batch_is_a_quarter() {
        let mut unit = unit(Context::Update, UnitConfig::new(16));
        for _ in 0..8 {
            submit(&unit, ProcessBuilder::new().callback(|_| Poll::Continue));
        }
        assert_eq!(unit.tick(frame()).added, 2);
        assert_eq!(unit.tick(frame()).added, 1);
        assert_eq!(unit.live(), 3);
    }

    #[test]
    fn test_idle_unit_early_out() {
        let mut unit = unit(Context::Update, UnitConfig::new(4));
        let report = unit.tick(frame());
        assert!(report.idle);
        assert_eq!(unit.stats.snapshot().ticks, 1);
    }

    #[test]
    fn test_time_budget_rotates_cursor() {
        let config = UnitConfig::new(16)
            .with_add_batch(BatchPolicy::All)
            .with_time_budget(Duration::from_millis(1));
        let mut unit = unit(Context::Async, config);
        let counters: Vec<Arc<AtomicUsize>> =
            (0..6).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for counter in &counters {
            let c = Arc::clone(counter);
            submit(
                &unit,
                ProcessBuilder::new().callback(move |_| {
                    std::thread::sleep(Duration::from_millis(2));
                    c.fetch_add(1, Ordering::SeqCst);
                    Poll::Continue
                }),
            );
        }

        for _ in 0..6 {
            let report = unit.tick(frame());
            assert_eq!(report.polled, 1);
            assert!(report.budget_exhausted);
        }
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_gate_runs_while_draining_adds() {
        let config = UnitConfig::new(8)
            .with_add_batch(BatchPolicy::All)
            .with_time_budget(Duration::from_millis(1));
        let mut unit = unit(Context::Async, config);
        for _ in 0..3 {
            submit(
                &unit,
                ProcessBuilder::new().callback(|_| {
                    std::thread::sleep(Duration::from_millis(2));
                    Poll::Continue
                }),
            );
        }
        unit.tick(frame());

        let polls = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&polls);
        let late = submit(
            &unit,
            ProcessBuilder::new().callback(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
                Poll::Continue
            }),
        );
        let report = unit.tick(frame());

        // The budget ran out before the new slot, yet it is already running
        assert!(report.budget_exhausted);
        assert_eq!(report.added, 1);
        assert_eq!(late.state(), ProcessState::Running);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_completion_published_before_payload_unlocks() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let (polling_tx, polling_rx) = std::sync::mpsc::channel();
        let core = submit(
            &unit,
            ProcessBuilder::new().callback(move |_| {
                let _ = polling_tx.send(());
                std::thread::sleep(Duration::from_millis(20));
                Poll::Done
            }),
        );

        // Stands in for a second context waiting to poll the same handle
        let contender = Arc::clone(&core);
        let observer = std::thread::spawn(move || {
            polling_rx.recv().unwrap();
            let _work = contender.work();
            contender.state()
        });

        unit.tick(frame());
        assert_eq!(observer.join().unwrap(), ProcessState::Stopped);
    }

    #[test]
    fn test_shutdown_evicts_everything() {
        let mut unit = unit(Context::Update, UnitConfig::new(8));
        let running = submit(&unit, ProcessBuilder::new().callback(|_| Poll::Continue));
        unit.tick(frame());
        let queued = submit(&unit, ProcessBuilder::new().callback(|_| Poll::Continue));

        assert_eq!(unit.shutdown(StopReason::Shutdown), 2);
        assert_eq!(running.stop_reason(), Some(StopReason::Shutdown));
        assert_eq!(queued.state(), ProcessState::Removed);
        assert_eq!(unit.queues.reserved(), 0);
        assert!(unit.registry.is_empty());
    }
}
