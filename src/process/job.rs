/*!
 * Parallel Job Driving
 *
 * A handle can drive a parallel job through the generic
 * schedule / poll completion / complete-now / dispose contract. The handle
 * never blocks on the job while polling: it reports `Continue` until the
 * driver says the job is complete. Only eviction may block, through
 * `complete_now`, so an in-flight job never outlives its handle.
 */

use super::payload::Poll;
use crate::core::id::{AtomicGenerator, IdGenerator};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Opaque token identifying one scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(pub u64);

impl From<u64> for JobToken {
    #[inline]
    fn from(raw: u64) -> Self {
        JobToken(raw)
    }
}

/// Work descriptor handed to a driver; shareable so a restarted handle can reschedule it
pub type JobWork = Arc<dyn Fn() + Send + Sync>;

/// Parallel-job back-end contract
#[cfg_attr(test, mockall::automock)]
pub trait JobDriver: Send + Sync {
    /// Start the work and return a token for it
    fn schedule(&self, work: JobWork) -> JobToken;

    /// Non-blocking completion check
    fn is_complete(&self, token: JobToken) -> bool;

    /// Block until the job has finished
    fn complete_now(&self, token: JobToken);

    /// Release any bookkeeping held for the token
    fn dispose(&self, token: JobToken);
}

// ============================================================================
// Thread-backed reference driver
// ============================================================================

struct JobEntry {
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Marks a job finished even when its work panics
struct DoneOnDrop(Arc<AtomicBool>);

impl Drop for DoneOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Runs every job on its own OS thread
pub struct ThreadJobDriver {
    jobs: DashMap<JobToken, JobEntry, RandomState>,
    tokens: AtomicGenerator<JobToken>,
}

impl ThreadJobDriver {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::with_hasher(RandomState::new()),
            tokens: AtomicGenerator::default_start(),
        }
    }

    /// Jobs scheduled and not yet disposed
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }
}

impl Default for ThreadJobDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDriver for ThreadJobDriver {
    fn schedule(&self, work: JobWork) -> JobToken {
        let token = self.tokens.next();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let thread_work = Arc::clone(&work);

        let thread = std::thread::Builder::new()
            .name(format!("tickflow-job-{}", token.0))
            .spawn(move || {
                let _done = DoneOnDrop(flag);
                thread_work();
            });

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                // Run inline rather than lose the work
                warn!(token = token.0, error = %e, "Job thread spawn failed, running inline");
                work_inline(&done, &work);
                None
            }
        };

        self.jobs.insert(token, JobEntry { done, thread });
        debug!(token = token.0, "Job scheduled");
        token
    }

    fn is_complete(&self, token: JobToken) -> bool {
        self.jobs
            .get(&token)
            .map(|entry| entry.done.load(Ordering::Acquire))
            .unwrap_or(true)
    }

    fn complete_now(&self, token: JobToken) {
        let thread = self
            .jobs
            .get_mut(&token)
            .and_then(|mut entry| entry.thread.take());
        if let Some(handle) = thread {
            if handle.join().is_err() {
                warn!(token = token.0, "Job panicked before completion");
            }
        }
    }

    fn dispose(&self, token: JobToken) {
        if let Some((_, entry)) = self.jobs.remove(&token) {
            if !entry.done.load(Ordering::Acquire) {
                debug!(token = token.0, "Disposing unfinished job, thread detached");
            }
        }
    }
}

fn work_inline(done: &Arc<AtomicBool>, work: &JobWork) {
    let _done = DoneOnDrop(Arc::clone(done));
    work();
}

// ============================================================================
// Per-handle job extension
// ============================================================================

/// Job attached to a handle, polled before the handle's own payload
pub struct JobBinding {
    driver: Arc<dyn JobDriver>,
    work: JobWork,
    token: Option<JobToken>,
    finished: bool,
}

impl JobBinding {
    pub fn new(driver: Arc<dyn JobDriver>, work: JobWork) -> Self {
        Self {
            driver,
            work,
            token: None,
            finished: false,
        }
    }

    /// Schedule on first poll, then report `Continue` until the driver completes it
    pub fn poll(&mut self) -> Poll {
        if self.finished {
            return Poll::Done;
        }
        let token = match self.token {
            Some(token) => token,
            None => {
                let token = self.driver.schedule(Arc::clone(&self.work));
                self.token = Some(token);
                token
            }
        };
        if self.driver.is_complete(token) {
            self.driver.dispose(token);
            self.token = None;
            self.finished = true;
            Poll::Done
        } else {
            Poll::Continue
        }
    }

    /// Synchronously finish an in-flight job; runs at eviction
    pub fn finish(&mut self) {
        if let Some(token) = self.token.take() {
            self.driver.complete_now(token);
            self.driver.dispose(token);
        }
    }

    /// Prepare for a fresh submission
    pub fn reset(&mut self) {
        self.finish();
        self.finished = false;
    }

    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Debug for JobBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBinding")
            .field("token", &self.token)
            .field("finished", &self.finished)
            .finish()
    }
}
