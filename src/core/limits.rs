/*!
 * Scheduler Limits and Constants
 *
 * Centralized location for capacities, batch sizes and timing defaults.
 * Performance-critical constants are marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// CAPACITY
// =============================================================================

/// Default slot capacity of one execution unit
/// Callers provision capacity up front; units never grow
pub const DEFAULT_UNIT_CAPACITY: usize = 4096;

/// Default bound on requests waiting in one add-queue or remove-queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Recycled handles kept around for reuse
pub const DEFAULT_HANDLE_POOL_CAPACITY: usize = 256;

/// Upper bound accepted for any configured capacity
pub const MAX_UNIT_CAPACITY: usize = 1 << 20;

// =============================================================================
// BATCHING
// =============================================================================

/// Additions drained per tick are pending / this divisor (at least one)
/// [PERF] Keeps a burst of submissions from stalling the hot iteration
pub const DEFAULT_ADD_BATCH_DIVISOR: usize = 4;

// =============================================================================
// TIME SLICING
// =============================================================================

/// Per-tick polling budget of the async (time-sliced) unit
pub const DEFAULT_ASYNC_BUDGET: Duration = Duration::from_millis(4);

/// Time scale applied to host-supplied frame deltas unless overridden
pub const DEFAULT_TIME_SCALE: f64 = 1.0;

/// Ticks longer than this are logged as slow
pub const SLOW_TICK_THRESHOLD: Duration = Duration::from_millis(50);

// =============================================================================
// WORKER THREADS
// =============================================================================

/// Fraction of logical processors used for the default worker bound
pub const WORKER_CPU_DIVISOR: usize = 4;

/// Hard ceiling on worker threads regardless of configuration
pub const MAX_WORKER_THREADS: usize = 64;

/// Sleep between ticks of an idle worker
/// [PERF] Long enough to stop busy-spinning, short enough for sub-frame latency
pub const DEFAULT_WORKER_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Thread name prefix for worker threads
pub const WORKER_THREAD_PREFIX: &str = "tickflow-worker";

/// Default worker bound: a fraction of available logical processors, at least one
pub fn default_worker_threads() -> usize {
    let logical = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (logical / WORKER_CPU_DIVISOR).clamp(1, MAX_WORKER_THREADS)
}
