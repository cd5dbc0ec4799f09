/*!
 * Monitoring
 * Structured tracing and lock-free scheduler statistics
 */

mod stats;
mod tracer;

pub use stats::{SchedulerStats, UnitStats, UnitStatsSnapshot};
pub use tracer::{init_tracing, span_tick, TickSpan};
