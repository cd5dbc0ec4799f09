/*!
 * Scheduler
 *
 * Public entry point. Resolves each submission's contexts, routes add and
 * remove requests to the matching execution units, lazily provisions worker
 * threads for the thread context, and exposes the host-loop tick calls.
 *
 * One explicit `Scheduler` per runtime; nothing here is global, so several
 * independent schedulers can coexist (tests rely on this).
 */

pub mod builder;
pub mod clock;
pub mod config;
mod queues;
mod registry;
pub mod resolve;
pub mod slots;
mod unit;
mod worker;

pub use builder::SchedulerBuilder;
pub use clock::{FrameTime, UnitClock};
pub use config::{BatchPolicy, SchedulerConfig, UnitConfig};
pub use resolve::{resolve_contexts, DEFAULT_CONTEXT};
pub use slots::{SlotAllocator, Slotted};
pub use unit::TickReport;

use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::id::ProcessId;
use crate::core::types::{Context, CONTEXT_COUNT};
use crate::monitoring::{SchedulerStats, UnitStats};
use crate::process::{
    HandleCore, JobDriver, Poll, ProcessBuilder, ProcessHandle, StopReason, Task, ThreadJobDriver,
    Tick,
};
use parking_lot::Mutex;
use queues::{Request, UnitQueues};
use registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use unit::ExecutionUnit;
use worker::WorkerPool;

/// Host-driven unit plus the producer handles the facade needs without locking it
struct HostUnit {
    queues: Arc<UnitQueues>,
    stats: Arc<UnitStats>,
    unit: Mutex<ExecutionUnit>,
}

impl HostUnit {
    fn new(unit: ExecutionUnit) -> Self {
        Self {
            queues: Arc::clone(unit.queues()),
            stats: Arc::clone(unit.stats()),
            unit: Mutex::new(unit),
        }
    }
}

/// Cooperative multi-context scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<Registry>,
    host: [Option<HostUnit>; CONTEXT_COUNT],
    workers: WorkerPool,
    job_driver: Arc<dyn JobDriver>,
    shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Scheduler with the thread-backed job driver
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        Self::with_driver(config, Arc::new(ThreadJobDriver::new()))
    }

    pub fn with_driver(
        config: SchedulerConfig,
        job_driver: Arc<dyn JobDriver>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new(config.pool_capacity));

        let host = std::array::from_fn(|index| {
            Context::from_index(index)
                .filter(|context| context.is_host_driven())
                .map(|context| {
                    HostUnit::new(ExecutionUnit::new(
                        context,
                        None,
                        config.unit(context),
                        Arc::clone(&registry),
                    ))
                })
        });
        let workers = WorkerPool::new(
            config.max_worker_threads,
            config.unit(Context::Thread),
            config.worker_idle_sleep,
            Arc::clone(&registry),
        );

        info!(
            capacity = config.default_unit.capacity,
            max_workers = config.max_worker_threads,
            async_budget_ms = config.async_budget.as_millis() as u64,
            "Scheduler initialized"
        );

        Ok(Self {
            config,
            registry,
            host,
            workers,
            job_driver,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Driver used by `spawn_job`; share it to build job handles by hand
    pub fn job_driver(&self) -> Arc<dyn JobDriver> {
        Arc::clone(&self.job_driver)
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a handle built with `ProcessHandle::builder`
    ///
    /// Idempotent while the handle is scheduled. A finished handle that every
    /// unit has released is reset and submitted fresh.
    pub fn start(&self, handle: &ProcessHandle) -> SchedulerResult<()> {
        self.submit_core(&handle.core)
    }

    /// Build and submit in one step
    pub fn submit(&self, builder: ProcessBuilder) -> SchedulerResult<ProcessHandle> {
        let core = self.registry.acquire();
        core.install(builder);
        self.submit_core(&core)?;
        Ok(ProcessHandle::from_core(core))
    }

    /// Run a callback in one context
    pub fn run<F>(&self, context: Context, callback: F) -> SchedulerResult<ProcessHandle>
    where
        F: FnMut(&Tick) -> Poll + Send + 'static,
    {
        self.submit(ProcessBuilder::new().context(context).callback(callback))
    }

    /// Run a task in every context it declares
    pub fn spawn<T: Task>(&self, task: T) -> SchedulerResult<ProcessHandle> {
        self.submit(ProcessBuilder::new().task(task))
    }

    /// Drive a parallel job to completion from the update loop
    pub fn spawn_job<F>(&self, work: F) -> SchedulerResult<ProcessHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.submit(ProcessBuilder::new().job(self.job_driver(), work))
    }

    fn submit_core(&self, core: &Arc<HandleCore>) -> SchedulerResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }

        let state = core.state();
        if state.is_scheduled() {
            return Ok(());
        }
        if state.is_terminal() && !core.rewind() && core.state().is_terminal() {
            return Err(SchedulerError::StillEvicting);
        }

        let mask = {
            let body = core.body();
            resolve_contexts(body.requested, body.profile, body.has_job, body.flags)?
        };

        let mut reserved: Vec<Arc<UnitQueues>> = Vec::with_capacity(mask.len());
        let mut worker = None;
        for context in mask.iter() {
            let queues = match self.reserve(context) {
                Ok((queues, index)) => {
                    worker = worker.or(index);
                    queues
                }
                Err(err) => {
                    reserved.iter().for_each(|q| q.cancel_reservation());
                    warn!(id = %core.id(), %context, error = %err, "Submission rejected");
                    return Err(err);
                }
            };
            reserved.push(queues);
        }

        // Registered before the claim so an immediate eviction can unregister it
        self.registry.insert(core);
        if core.begin_submission(mask).is_none() {
            // A concurrent start claimed it first
            reserved.iter().for_each(|q| q.cancel_reservation());
            return Ok(());
        }

        core.set_worker(worker);
        for queues in &reserved {
            queues.push_add(Request::new(Arc::clone(core)));
        }
        debug!(id = %core.id(), contexts = %mask, "Process submitted");
        Ok(())
    }

    /// Reserve room in the unit serving `context`
    fn reserve(&self, context: Context) -> SchedulerResult<(Arc<UnitQueues>, Option<usize>)> {
        let (queues, worker) = match context {
            Context::Thread => {
                let worker = self.workers.select()?;
                (Arc::clone(worker.queues()), Some(worker.index()))
            }
            _ => (Arc::clone(&self.host_unit(context)?.queues), None),
        };
        queues.try_reserve()?;
        Ok((queues, worker))
    }

    fn host_unit(&self, context: Context) -> SchedulerResult<&HostUnit> {
        self.host[context.index()]
            .as_ref()
            .ok_or_else(|| SchedulerError::Config(format!("{} is not host driven", context)))
    }

    /// Producer queues of the unit currently holding `core` in `context`
    fn queues_of(&self, core: &HandleCore, context: Context) -> Option<Arc<UnitQueues>> {
        match context {
            Context::Thread => core
                .worker()
                .and_then(|index| self.workers.get(index))
                .map(|worker| Arc::clone(worker.queues())),
            _ => self.host[context.index()]
                .as_ref()
                .map(|host| Arc::clone(&host.queues)),
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel a process; takes effect on each owning unit's next tick
    ///
    /// Returns false when the process was not scheduled or already cancelled.
    pub fn stop(&self, handle: &ProcessHandle) -> bool {
        self.stop_core(&handle.core, StopReason::Cancelled)
    }

    pub fn stop_id(&self, id: ProcessId) -> bool {
        self.registry
            .get(id)
            .is_some_and(|core| self.stop_core(&core, StopReason::Cancelled))
    }

    fn stop_core(&self, core: &Arc<HandleCore>, reason: StopReason) -> bool {
        if !core.state().is_scheduled() || !core.request_cancel(reason) {
            return false;
        }
        for context in core.joined().iter() {
            if let Some(queues) = self.queues_of(core, context) {
                queues.push_remove(Request::new(Arc::clone(core)));
            }
        }
        debug!(id = %core.id(), ?reason, "Process cancellation requested");
        true
    }

    /// Cancel everything scheduled (hard reset); returns how many were cancelled
    pub fn clear(&self) -> usize {
        let cancelled = self
            .registry
            .collect(None)
            .iter()
            .filter(|core| self.stop_core(core, StopReason::Cancelled))
            .count();
        info!(cancelled, "Scheduler cleared");
        cancelled
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: ProcessId) -> Option<ProcessHandle> {
        self.registry.get(id).map(ProcessHandle::from_core)
    }

    /// First process with this name, across all contexts or within one
    pub fn find(&self, name: &str, context: Option<Context>) -> Option<ProcessHandle> {
        self.registry
            .find(name, context)
            .map(ProcessHandle::from_core)
    }

    /// Registered processes ordered by id, across all contexts or within one
    pub fn processes(&self, context: Option<Context>) -> Vec<ProcessHandle> {
        self.registry
            .collect(context)
            .into_iter()
            .map(ProcessHandle::from_core)
            .collect()
    }

    /// Whether this exact handle is registered (submitted and not yet evicted)
    pub fn contains(&self, handle: &ProcessHandle) -> bool {
        self.registry
            .get(handle.id())
            .is_some_and(|core| Arc::ptr_eq(&core, &handle.core))
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // ========================================================================
    // Host loop
    // ========================================================================

    /// Tick one host-driven context; thread units drive themselves
    pub fn tick(&self, context: Context, time: FrameTime) -> TickReport {
        match self.host[context.index()].as_ref() {
            Some(host) => host.unit.lock().tick(time),
            None => TickReport::idle(),
        }
    }

    pub fn update(&self, time: FrameTime) -> TickReport {
        self.tick(Context::Update, time)
    }

    pub fn late_update(&self, time: FrameTime) -> TickReport {
        self.tick(Context::LateUpdate, time)
    }

    pub fn fixed_update(&self, time: FrameTime) -> TickReport {
        self.tick(Context::FixedUpdate, time)
    }

    pub fn async_update(&self, time: FrameTime) -> TickReport {
        self.tick(Context::Async, time)
    }

    pub fn editor_update(&self, time: FrameTime) -> TickReport {
        self.tick(Context::Editor, time)
    }

    /// One frame: update, then the time-sliced async pass, then late update
    pub fn frame(&self, time: FrameTime) -> TickReport {
        let mut report = self.update(time);
        report += self.async_update(time);
        report += self.late_update(time);
        report
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn stats(&self) -> SchedulerStats {
        let mut units: Vec<_> = self
            .host
            .iter()
            .flatten()
            .map(|host| host.stats.snapshot())
            .collect();
        units.extend(self.workers.snapshots());
        SchedulerStats {
            units,
            registered: self.registry.len(),
            pooled: self.registry.pooled(),
            workers: self.workers.len(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stop workers and evict everything still scheduled
    ///
    /// Further submissions fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.workers.shutdown();
        let evicted: usize = self
            .host
            .iter()
            .flatten()
            .map(|host| host.unit.lock().shutdown(StopReason::Shutdown))
            .sum();
        info!(evicted, "Scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
