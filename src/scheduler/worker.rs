/*!
 * Worker Pool
 *
 * Thread-context units, each moved into its own OS thread. Workers are spawned
 * lazily: a new one only when every existing worker is busy and the bound
 * allows it, otherwise the least-loaded worker takes the process.
 *
 * The worker list is read on every thread submission and written only on
 * spawn, so it lives behind an ArcSwap.
 */

use super::config::UnitConfig;
use super::queues::UnitQueues;
use super::registry::Registry;
use super::unit::ExecutionUnit;
use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::limits::WORKER_THREAD_PREFIX;
use crate::core::types::Context;
use crate::monitoring::{UnitStats, UnitStatsSnapshot};
use crate::process::StopReason;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Producer-side view of one worker
pub(crate) struct Worker {
    index: usize,
    queues: Arc<UnitQueues>,
    stats: Arc<UnitStats>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn queues(&self) -> &Arc<UnitQueues> {
        &self.queues
    }

    /// Processes joined to this worker
    #[inline]
    pub fn load(&self) -> usize {
        self.queues.reserved()
    }

    pub fn snapshot(&self) -> UnitStatsSnapshot {
        self.stats.snapshot()
    }
}

pub(crate) struct WorkerPool {
    workers: ArcSwap<Vec<Arc<Worker>>>,
    spawn_lock: Mutex<()>,
    max_workers: usize,
    unit_config: UnitConfig,
    idle_sleep: Duration,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        max_workers: usize,
        unit_config: UnitConfig,
        idle_sleep: Duration,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            workers: ArcSwap::from_pointee(Vec::new()),
            spawn_lock: Mutex::new(()),
            max_workers: max_workers.max(1),
            unit_config,
            idle_sleep,
            registry,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Worker that should take the next thread-context process
    pub fn select(&self) -> SchedulerResult<Arc<Worker>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }
        if let Some(worker) = self.pick(&self.workers.load()) {
            return Ok(worker);
        }

        let _guard = self.spawn_lock.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::ShuttingDown);
        }
        // Another submitter may have spawned while we waited
        let current = self.workers.load_full();
        if let Some(worker) = self.pick(&current) {
            return Ok(worker);
        }

        let worker = self.spawn(current.len())?;
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::clone(&worker));
        self.workers.store(Arc::new(next));
        Ok(worker)
    }

    /// An idle worker, or the least loaded one once the bound is reached
    fn pick(&self, workers: &[Arc<Worker>]) -> Option<Arc<Worker>> {
        let least = workers.iter().min_by_key(|worker| worker.load())?;
        if least.load() == 0 || workers.len() >= self.max_workers {
            Some(Arc::clone(least))
        } else {
            None
        }
    }

    fn spawn(&self, index: usize) -> SchedulerResult<Arc<Worker>> {
        let unit = ExecutionUnit::new(
            Context::Thread,
            Some(index),
            self.unit_config,
            Arc::clone(&self.registry),
        );
        let queues = Arc::clone(unit.queues());
        let stats = Arc::clone(unit.stats());
        let shutdown = Arc::clone(&self.shutdown);
        let idle_sleep = self.idle_sleep;

        let thread = thread::Builder::new()
            .name(format!("{}-{}", WORKER_THREAD_PREFIX, index))
            .spawn(move || run_worker(unit, shutdown, idle_sleep))
            .map_err(|e| SchedulerError::WorkerSpawn(e.to_string()))?;

        info!(worker = index, max = self.max_workers, "Worker thread spawned");
        Ok(Arc::new(Worker {
            index,
            queues,
            stats,
            thread: Mutex::new(Some(thread)),
        }))
    }

    pub fn get(&self, index: usize) -> Option<Arc<Worker>> {
        self.workers.load().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.workers.load().len()
    }

    pub fn snapshots(&self) -> Vec<UnitStatsSnapshot> {
        self.workers.load().iter().map(|w| w.snapshot()).collect()
    }

    /// Stop every worker and wait for it to evict its processes
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.spawn_lock.lock();
        for worker in self.workers.load().iter() {
            if let Some(thread) = worker.thread.lock().take() {
                if thread.join().is_err() {
                    warn!(worker = worker.index, "Worker thread panicked");
                }
            }
        }
        info!(workers = self.len(), "Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut unit: ExecutionUnit, shutdown: Arc<AtomicBool>, idle_sleep: Duration) {
    debug!("Worker loop started");
    while !shutdown.load(Ordering::Acquire) {
        let report = unit.tick_wall();
        if report.idle {
            thread::sleep(idle_sleep);
        } else {
            thread::yield_now();
        }
    }
    let evicted = unit.shutdown(StopReason::Shutdown);
    debug!(evicted, "Worker loop stopped");
}
