//! Task control block and the small newtypes that stand in for the
//! teacher's raw `*mut Task` pointers.
//!
//! spec.md's Design Notes call out the duck-typed-handle pattern ("hold
//! task-ids, not owning handles ... in a safe Rust port these become an
//! index into an owned arena, checked at the boundary") — `TaskId` is
//! exactly that index. The registry in `registry.rs` is the sole owner of
//! `Task` values; every other structure (ready queue, sleep queue, load
//! balancer) only ever stores a `TaskId`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

pub type CpuId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Currently the CPU's `current` task.
    Running,
    /// Linked into a per-CPU ready queue, waiting for `pick_next`.
    Ready,
    /// Not linked anywhere runnable; waiting on `reason`.
    Blocked,
    /// Has called exit; retained until reaped.
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not currently blocked.
    None,
    Sleep,
    Futex,
    Lock,
    ThreadPool,
}

/// Key a task is currently filed under in a per-CPU ordered set
/// (vruntime/deadline, insertion sequence) — kept on the task itself so a
/// caller that wants to unlink it doesn't have to recompute the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub primary: u64,
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub name: &'static str,
    pub nice: i8,
    pub weight: u32,
    pub home_cpu: CpuId,
    pub state: TaskState,
    pub block_reason: BlockReason,

    /// Weighted virtual runtime, nanoseconds. Monotonic while `Ready`,
    /// frozen while `Running` between ticks (charged at tick time), reset
    /// relative to the queue's `min_vruntime` on wakeup.
    pub vruntime: u64,
    /// Present while linked into a ready or sleep queue; `None` otherwise.
    pub order_key: Option<OrderKey>,
    /// Absolute wake time while sleeping; `None` otherwise.
    pub wake_deadline_ns: Option<u64>,

    /// Logical-clock timestamp (ns) at which this task was last charged
    /// vruntime — either when it was picked to run, or at the last tick
    /// while it kept running. Charging `now - scheduled_in_ns` each tick
    /// is how `vruntime` accumulates only real running time.
    pub scheduled_in_ns: u64,

    /// True once this task has been scheduled in at least once. A task
    /// that has never run starts at the queue's current `min_vruntime`
    /// instead of zero, so it can't claim a huge share by dint of having
    /// an untouched `vruntime` of 0.
    pub ever_ran: bool,

    pub is_idle: bool,
    pub migrations: u32,
    pub context_switches_in: u64,
}

impl Task {
    pub fn new(id: TaskId, name: &'static str, nice: i8, home_cpu: CpuId) -> Self {
        Self {
            id,
            name,
            nice,
            weight: crate::weight::weight_for_nice(nice),
            home_cpu,
            state: TaskState::Ready,
            block_reason: BlockReason::None,
            vruntime: 0,
            scheduled_in_ns: 0,
            order_key: None,
            wake_deadline_ns: None,
            ever_ran: false,
            is_idle: false,
            migrations: 0,
            context_switches_in: 0,
        }
    }

    pub fn idle(id: TaskId, home_cpu: CpuId) -> Self {
        let mut t = Self::new(id, "idle", 0, home_cpu);
        t.is_idle = true;
        t.ever_ran = true;
        t
    }
}

/// Per-CPU counters exposed to callers (spec.md §3's "idle/user/kernel
/// tick counts, context switch count" scheduler stats).
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedStats {
    pub idle_ticks: u64,
    pub busy_ticks: u64,
    pub context_switches: u64,
    pub migrations_in: u64,
    pub migrations_out: u64,
}
