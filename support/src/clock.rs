//! Monotonic time.
//!
//! Mirrors `slopos-lib::clock`'s "everything reads through one accessor"
//! shape, but two accessors exist here: a real wall clock for components
//! that run on native OS threads (the buffer cache, the thread pool), and
//! a `LogicalClock` for the scheduler, which spec.md drives from timer
//! ticks rather than a hardware TSC/HPET. Advancing the logical clock is
//! how scheduler tests get deterministic, non-flaky wall-clock scenarios
//! (spec.md §8's "run for 1 second" properties) without actually sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Timer interrupt frequency, per spec.md §6.
pub const TIMER_FREQ: u64 = 100;
pub const NSEC_PER_SEC: u64 = 1_000_000_000;
/// Nanoseconds advanced per timer tick: `1e9 / TIMER_FREQ`.
pub const NSEC_PER_TICK: u64 = NSEC_PER_SEC / TIMER_FREQ;

/// Real wall-clock nanoseconds since an arbitrary, process-local epoch.
/// Used by the buffer cache's background flush cadence and the thread
/// pool, neither of which is driven by the scheduler's own tick source.
pub fn wall_clock_ns() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// Unix epoch milliseconds, used only for diagnostics/log timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A tick-driven monotonic clock: every `advance_tick` call represents one
/// 100 Hz timer interrupt, exactly as spec.md §4.2/§6 describes CPU 0's
/// timer handler advancing wall-clock nanoseconds by `NSEC_PER_TICK`.
#[derive(Debug, Default)]
pub struct LogicalClock {
    ticks: AtomicU64,
}

impl LogicalClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    pub fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ticks() * NSEC_PER_TICK
    }

    /// Advance by one timer tick, returning the new tick count.
    pub fn advance_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Advance by an arbitrary number of nanoseconds, rounding down to
    /// whole ticks. Used by tests that want to fast-forward by a duration
    /// (e.g. "sleep 5 seconds") without looping tick-by-tick.
    pub fn advance_ns(&self, ns: u64) -> u64 {
        let delta_ticks = ns / NSEC_PER_TICK;
        self.ticks.fetch_add(delta_ticks, Ordering::AcqRel) + delta_ticks
    }
}
