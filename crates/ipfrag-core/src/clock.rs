//! Monotonic tick sources.
//!
//! The table only compares tick counts; what a tick means is up to the clock.

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic, opaque tick source
pub trait Clock {
    /// Current tick count; never decreases
    fn now(&self) -> u64;
}

/// Wall-clock backed ticks at a fixed resolution
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    origin: Instant,
    ticks_per_sec: u64,
}

impl TickClock {
    /// Nanosecond-resolution clock starting at zero now
    pub fn new() -> Self {
        Self::with_resolution(1_000_000_000)
    }

    /// Clock ticking `ticks_per_sec` times a second
    ///
    /// # Panics
    ///
    /// Panics if `ticks_per_sec` is zero.
    pub fn with_resolution(ticks_per_sec: u64) -> Self {
        assert!(ticks_per_sec > 0, "tick rate must be greater than 0");
        Self {
            origin: Instant::now(),
            ticks_per_sec,
        }
    }

    /// Ticks per second
    pub fn ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    /// Convert a duration to ticks, rounding up to the next whole tick
    pub fn ticks_for(&self, duration: Duration) -> u64 {
        let ticks = duration
            .as_nanos()
            .saturating_mul(u128::from(self.ticks_per_sec))
            .div_ceil(1_000_000_000);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TickClock {
    fn now(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        let ticks = elapsed.as_nanos() * u128::from(self.ticks_per_sec) / 1_000_000_000;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for tests and offline replay
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: Cell<u64>,
}

impl ManualClock {
    /// Clock reading `start`
    pub fn new(start: u64) -> Self {
        Self {
            ticks: Cell::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, ticks: u64) {
        self.ticks.set(self.ticks.get().saturating_add(ticks));
    }

    /// Jump to `ticks`; ignored if it would move the clock backwards
    pub fn set(&self, ticks: u64) {
        if ticks > self.ticks.get() {
            self.ticks.set(ticks);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.ticks.get()
    }
}
