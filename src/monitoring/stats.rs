/*!
 * Lock-Free Unit Statistics
 * Atomic counters for zero-contention stats tracking in the tick loop
 */

use crate::core::types::Context;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Atomic statistics for one execution unit
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - All operations use relaxed ordering
/// - Written by the owning unit, read by any thread through `snapshot`
#[repr(C, align(64))]
#[derive(Debug)]
pub struct UnitStats {
    context: Context,
    worker: Option<usize>,
    ticks: AtomicU64,
    polls: AtomicU64,
    added: AtomicU64,
    removed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    collapsed: AtomicU64,
    budget_exhausted: AtomicU64,
    live: AtomicUsize,
}

impl UnitStats {
    #[inline]
    pub fn new(context: Context, worker: Option<usize>) -> Self {
        Self {
            context,
            worker,
            ticks: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            added: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            collapsed: AtomicU64::new(0),
            budget_exhausted: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Hot path - called once per tick with the pass total
    #[inline(always)]
    pub fn add_polls(&self, count: usize) {
        self.polls.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_added(&self) {
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_removed(&self) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_collapsed(&self) {
        self.collapsed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_budget_exhausted(&self) {
        self.budget_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Live slot count after the latest tick
    #[inline]
    pub fn set_live(&self, count: usize) {
        self.live.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Get snapshot of current stats
    ///
    /// # Note
    /// Counters may be mutually inconsistent under concurrent ticks, but each
    /// individual value is accurate. This is acceptable for monitoring.
    pub fn snapshot(&self) -> UnitStatsSnapshot {
        UnitStatsSnapshot {
            context: self.context,
            worker: self.worker,
            ticks: self.ticks.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            collapsed: self.collapsed.load(Ordering::Relaxed),
            budget_exhausted: self.budget_exhausted.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one unit's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UnitStatsSnapshot {
    pub context: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<usize>,
    pub ticks: u64,
    pub polls: u64,
    pub added: u64,
    pub removed: u64,
    pub completed: u64,
    pub failed: u64,
    pub collapsed: u64,
    pub budget_exhausted: u64,
    pub live: usize,
}

/// Scheduler-wide snapshot returned by `Scheduler::stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerStats {
    pub units: Vec<UnitStatsSnapshot>,
    /// Handles currently registered (submitted and not yet evicted)
    pub registered: usize,
    /// Evicted handles waiting in the reuse pool
    pub pooled: usize,
    pub workers: usize,
}

impl SchedulerStats {
    /// Units of one context; several for `Thread`
    pub fn context(&self, context: Context) -> impl Iterator<Item = &UnitStatsSnapshot> {
        self.units.iter().filter(move |unit| unit.context == context)
    }

    pub fn total_completed(&self) -> u64 {
        self.units.iter().map(|unit| unit.completed).sum()
    }

    pub fn total_live(&self) -> usize {
        self.units.iter().map(|unit| unit.live).sum()
    }
}
