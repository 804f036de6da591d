//! Scheduler tunables, carried over from the teacher's `per_cpu.rs`
//! constants but renamed to the CFS-style terms spec.md §4.2 uses.

/// Target latency: every runnable task should get a slice within this
/// window, sized down per-task if more tasks are runnable than fit.
pub const SCHED_LATENCY_NS: u64 = 20_000_000;

/// No task is given a slice smaller than this, even when the ready queue
/// is deep enough that `SCHED_LATENCY_NS / runnable` would be shorter.
pub const MIN_GRANULARITY_NS: u64 = 4_000_000;

/// A task waking from sleep/block is credited at most this much vruntime
/// below the queue's `min_vruntime`, bounding how far a long sleeper can
/// leapfrog tasks that stayed runnable.
pub const WAKEUP_BONUS_CAP_NS: u64 = SCHED_LATENCY_NS;

/// Load-balance imbalance threshold: a source CPU only donates work to a
/// target CPU once the source's runnable count exceeds the target's by
/// more than this percentage.
pub const LOAD_IMBALANCE_PERCENT: u32 = 25;

/// Valid nice range, inclusive.
pub const NICE_MIN: i8 = -20;
pub const NICE_MAX: i8 = 19;
