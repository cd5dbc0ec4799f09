/*!
 * Per-Context Process Timing
 * Elapsed and delta time tracked independently for every context
 */

use crate::core::types::{Context, CONTEXT_COUNT};
use std::time::Duration;

/// Timing of one process inside one context
///
/// The first sample after a reset only establishes a baseline, so a process
/// added late in a long-running unit does not see a spurious large first step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextTiming {
    last_sample: Option<Duration>,
    delta: Duration,
    elapsed: Duration,
}

impl ContextTiming {
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a sample of the owning unit's clock
    ///
    /// `delta = max(0, sample - last)`, `elapsed += delta`
    #[inline]
    pub fn sample(&mut self, now: Duration) -> Duration {
        self.delta = match self.last_sample {
            Some(last) => now.saturating_sub(last),
            None => Duration::ZERO,
        };
        self.last_sample = Some(now);
        self.elapsed += self.delta;
        self.delta
    }

    #[inline(always)]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[inline]
    pub fn has_sampled(&self) -> bool {
        self.last_sample.is_some()
    }
}

/// One timing record per context
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingTable([ContextTiming; CONTEXT_COUNT]);

impl TimingTable {
    #[inline(always)]
    pub fn get(&self, context: Context) -> &ContextTiming {
        &self.0[context.index()]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, context: Context) -> &mut ContextTiming {
        &mut self.0[context.index()]
    }

    pub fn reset_all(&mut self) {
        self.0.iter_mut().for_each(ContextTiming::reset);
    }
}
