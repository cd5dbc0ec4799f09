/*!
 * Unit Request Queues
 *
 * The only structures an execution unit shares with other threads. Any
 * thread may reserve capacity and push add or remove requests; only the
 * owning unit drains them. Pending counters are atomics so an idle unit can
 * early-out without touching the locks.
 */

use super::config::{BatchPolicy, UnitConfig};
use crate::core::errors::{SchedulerError, SchedulerResult};
use crate::core::types::Context;
use crate::process::HandleCore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A queued add or remove for one incarnation of a handle
pub(crate) struct Request {
    pub handle: Arc<HandleCore>,
    /// Submission generation the request was issued for
    pub generation: u32,
}

impl Request {
    pub fn new(handle: Arc<HandleCore>) -> Self {
        let generation = handle.generation();
        Self { handle, generation }
    }

    /// The handle has not been resubmitted since this request was issued
    #[inline]
    pub fn is_current(&self) -> bool {
        self.handle.generation() == self.generation
    }
}

/// Producer side of an execution unit
pub(crate) struct UnitQueues {
    context: Context,
    capacity: usize,
    queue_capacity: usize,
    adds: Mutex<VecDeque<Request>>,
    removes: Mutex<VecDeque<Request>>,
    pending_adds: AtomicUsize,
    pending_removes: AtomicUsize,
    /// Handles joined to the unit: queued for add or holding a slot
    reserved: AtomicUsize,
}

impl UnitQueues {
    pub fn new(context: Context, config: &UnitConfig) -> Self {
        Self {
            context,
            capacity: config.capacity,
            queue_capacity: config.queue_capacity,
            adds: Mutex::new(VecDeque::new()),
            removes: Mutex::new(VecDeque::new()),
            pending_adds: AtomicUsize::new(0),
            pending_removes: AtomicUsize::new(0),
            reserved: AtomicUsize::new(0),
        }
    }

    /// Claim room for one more handle, or fail without side effects
    pub fn try_reserve(&self) -> SchedulerResult<()> {
        let capacity = self.capacity;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| SchedulerError::CapacityExceeded {
                context: self.context,
                capacity,
            })?;

        let queue_capacity = self.queue_capacity;
        let queued = self
            .pending_adds
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < queue_capacity).then_some(n + 1)
            });
        if queued.is_err() {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            return Err(SchedulerError::QueueFull {
                context: self.context,
                capacity: queue_capacity,
            });
        }
        Ok(())
    }

    /// Undo a `try_reserve` whose request was never pushed
    pub fn cancel_reservation(&self) {
        self.pending_adds.fetch_sub(1, Ordering::AcqRel);
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    /// Push an add request; the caller holds a reservation for it
    pub fn push_add(&self, request: Request) {
        self.adds.lock().push_back(request);
    }

    pub fn push_remove(&self, request: Request) {
        self.removes.lock().push_back(request);
        self.pending_removes.fetch_add(1, Ordering::AcqRel);
    }

    /// Take the next batch of additions
    pub fn take_adds(&self, policy: BatchPolicy) -> Vec<Request> {
        let taken = Self::take(&self.adds, policy);
        self.pending_adds.fetch_sub(taken.len(), Ordering::AcqRel);
        taken
    }

    /// Take the next batch of removals
    pub fn take_removes(&self, policy: BatchPolicy) -> Vec<Request> {
        let taken = Self::take(&self.removes, policy);
        self.pending_removes.fetch_sub(taken.len(), Ordering::AcqRel);
        taken
    }

    fn take(queue: &Mutex<VecDeque<Request>>, policy: BatchPolicy) -> Vec<Request> {
        let mut queue = queue.lock();
        let batch = policy.batch(queue.len());
        queue.drain(..batch).collect()
    }

    /// A handle left the unit; its reservation is returned
    #[inline]
    pub fn release(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn pending_adds(&self) -> usize {
        self.pending_adds.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn pending_removes(&self) -> usize {
        self.pending_removes.load(Ordering::Acquire)
    }

    /// Handles joined to this unit
    #[inline(always)]
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// No request waiting in either queue
    #[inline(always)]
    pub fn is_drained(&self) -> bool {
        self.pending_adds() == 0 && self.pending_removes() == 0
    }
}
