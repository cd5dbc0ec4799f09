/*!
 * Unit Clock
 * Scaled and unscaled time as seen by one execution unit
 */

use crate::core::limits::DEFAULT_TIME_SCALE;
use std::time::{Duration, Instant};

/// Time step handed to a unit by its driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    /// Unscaled step since the previous tick
    pub delta: Duration,
    /// Multiplier applied for processes that use time scale
    pub time_scale: f64,
}

impl FrameTime {
    pub const fn new(delta: Duration) -> Self {
        Self {
            delta,
            time_scale: DEFAULT_TIME_SCALE,
        }
    }

    pub fn from_secs_f64(seconds: f64) -> Self {
        Self::new(Duration::from_secs_f64(seconds.max(0.0)))
    }

    pub const fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    /// Delta after applying the time scale; negative or NaN scales read as zero
    #[inline]
    pub fn scaled_delta(&self) -> Duration {
        if self.time_scale.is_finite() && self.time_scale > 0.0 {
            self.delta.mul_f64(self.time_scale)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for FrameTime {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

/// Accumulated time of one unit
#[derive(Debug, Clone)]
pub struct UnitClock {
    last_wall: Option<Instant>,
    elapsed: Duration,
    unscaled_elapsed: Duration,
    delta: Duration,
    unscaled_delta: Duration,
}

impl UnitClock {
    pub fn new() -> Self {
        Self {
            last_wall: None,
            elapsed: Duration::ZERO,
            unscaled_elapsed: Duration::ZERO,
            delta: Duration::ZERO,
            unscaled_delta: Duration::ZERO,
        }
    }

    /// Frame time measured from the wall clock since the previous call
    ///
    /// Self-driven units call this once per loop; the first call yields zero.
    pub fn wall_frame(&mut self) -> FrameTime {
        let now = Instant::now();
        let delta = self
            .last_wall
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_wall = Some(now);
        FrameTime::new(delta)
    }

    pub fn advance(&mut self, time: FrameTime) {
        self.unscaled_delta = time.delta;
        self.delta = time.scaled_delta();
        self.unscaled_elapsed += self.unscaled_delta;
        self.elapsed += self.delta;
    }

    /// Clock value a process samples for its own timing
    #[inline(always)]
    pub fn sample(&self, uses_time_scale: bool) -> Duration {
        if uses_time_scale {
            self.elapsed
        } else {
            self.unscaled_elapsed
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[inline]
    pub fn unscaled_elapsed(&self) -> Duration {
        self.unscaled_elapsed
    }

    #[inline]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    #[inline]
    pub fn unscaled_delta(&self) -> Duration {
        self.unscaled_delta
    }
}

impl Default for UnitClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_and_unscaled_accumulate_separately() {
        let mut clock = UnitClock::new();
        clock.advance(FrameTime::new(Duration::from_millis(10)).with_time_scale(0.5));
        clock.advance(FrameTime::new(Duration::from_millis(10)).with_time_scale(2.0));

        assert_eq!(clock.unscaled_elapsed(), Duration::from_millis(20));
        assert_eq!(clock.elapsed(), Duration::from_millis(25));
        assert_eq!(clock.delta(), Duration::from_millis(20));
        assert_eq!(clock.sample(true), Duration::from_millis(25));
        assert_eq!(clock.sample(false), Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_time_scale_reads_as_paused() {
        let frame = FrameTime::new(Duration::from_millis(16)).with_time_scale(-1.0);
        assert_eq!(frame.scaled_delta(), Duration::ZERO);
        let frame = FrameTime::new(Duration::from_millis(16)).with_time_scale(f64::NAN);
        assert_eq!(frame.scaled_delta(), Duration::ZERO);
    }

    #[test]
    fn test_wall_frame_first_call_is_zero() {
        let mut clock = UnitClock::new();
        assert_eq!(clock.wall_frame().delta, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.wall_frame().delta >= Duration::from_millis(2));
    }
}
