//! Monotonic simulated clock and slice pacing.
//!
//! The clock only advances by time that was actually granted and consumed:
//! CPU ticks at release, I/O service ticks at I/O completion. Nothing reads
//! wall time to produce a clock value.
//!
//! `Pacing` decides how long a simulated tick takes in real time. With a
//! zero tick the whole slice collapses into a single step, which keeps test
//! runs fast and ordering-only. A non-zero tick makes the executing actor
//! sleep tick by tick and sample its liveness flag before each one, which is
//! the only way a cooperative interruption can land mid-slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Tick-based simulated clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimClock {
    now: u64,
}

impl SimClock {
    /// Create a new clock at tick 0.
    pub fn new() -> Self {
        Self { now: 0 }
    }

    /// Current time in ticks.
    #[inline(always)]
    pub fn now_ticks(&self) -> u64 {
        self.now
    }

    /// Advance by a delta, saturating on overflow. Returns the new time.
    #[inline(always)]
    pub fn advance_by(&mut self, dt: u64) -> u64 {
        self.now = self.now.saturating_add(dt);
        self.now
    }
}

/// Real-time cost of one simulated tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pacing {
    tick: Duration,
}

impl Pacing {
    /// No real-time coupling: a slice completes in one step.
    pub const fn instant() -> Self {
        Self {
            tick: Duration::ZERO,
        }
    }

    /// One simulated tick lasts `tick` of wall time.
    pub const fn per_tick(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn from_micros(micros: u64) -> Self {
        Self::per_tick(Duration::from_micros(micros))
    }

    #[inline]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    #[inline]
    pub fn is_instant(&self) -> bool {
        self.tick.is_zero()
    }

    /// Execute up to `slice` ticks while `active` stays set.
    ///
    /// Returns the number of ticks actually executed. The flag is sampled
    /// before every tick, so a clear lands at the next tick boundary and the
    /// ticks already spent are kept.
    pub fn run_slice(&self, slice: u64, active: &AtomicBool) -> u64 {
        if self.is_instant() {
            return if active.load(Ordering::Acquire) {
                slice
            } else {
                0
            };
        }

        let mut elapsed = 0;
        while elapsed < slice {
            if !active.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(self.tick);
            elapsed += 1;
        }
        elapsed
    }

    /// Hold a resource for `ticks` with no interruption point.
    pub fn hold(&self, ticks: u64) {
        if self.is_instant() || ticks == 0 {
            return;
        }
        let total = self.tick.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX));
        thread::sleep(total);
    }
}
