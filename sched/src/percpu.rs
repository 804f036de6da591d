//! Per-CPU run queue plus the top-level `Scheduler` that owns every CPU's
//! queue, the shared task registry, the logical clock, and the IPI bus.
//!
//! Grounded on the teacher's `per_cpu.rs` (`PerCpuScheduler`, `with_local_scheduler`,
//! `select_target_cpu`, `find_least_loaded_cpu`) and `lifecycle.rs`
//! (`send_reschedule_ipi`), reworked per spec.md §4.2: priority-array
//! ready queues become the vruntime-ordered `ReadyQueue`, and raw
//! `*mut Task` linkage becomes `TaskId` lookups through `TaskRegistry`.

use std::sync::Arc;

use pilotos_support::ipi::{IpiBus, IpiClass};
use pilotos_support::SpinLock;

use crate::config::{LOAD_IMBALANCE_PERCENT, MIN_GRANULARITY_NS, SCHED_LATENCY_NS, WAKEUP_BONUS_CAP_NS};
use crate::error::{SchedError, SchedResult};
use crate::ready_queue::ReadyQueue;
use crate::registry::TaskRegistry;
use crate::sleep_queue::SleepQueue;
use crate::task::{BlockReason, CpuId, SchedStats, TaskId, TaskState};
use crate::weight::clamp_nice;

const NICE_0_LOAD: u64 = 1024;

struct PerCpuInner {
    ready: ReadyQueue,
    sleep: SleepQueue,
    runnable_weight: u64,
    current: Option<TaskId>,
    stats: SchedStats,
}

/// One CPU's share of the scheduler: its own ready queue, sleep queue,
/// and currently-running task, all behind one lock so a reschedule
/// decision sees a consistent snapshot of its own CPU (the teacher's
/// `PerCpuScheduler` makes the same single-lock-per-CPU choice).
pub struct PerCpuScheduler {
    pub cpu_id: CpuId,
    pub idle_task: TaskId,
    inner: SpinLock<PerCpuInner>,
}

impl PerCpuScheduler {
    fn new(cpu_id: CpuId, idle_task: TaskId) -> Self {
        Self {
            cpu_id,
            idle_task,
            inner: SpinLock::new(PerCpuInner {
                ready: ReadyQueue::new(),
                sleep: SleepQueue::new(),
                runnable_weight: 0,
                current: None,
                stats: SchedStats::default(),
            }),
        }
    }

    pub fn runnable_count(&self) -> usize {
        self.inner.lock().ready.len()
    }

    pub fn stats(&self) -> SchedStats {
        self.inner.lock().stats
    }

    pub fn current(&self) -> Option<TaskId> {
        self.inner.lock().current
    }
}

pub struct Scheduler {
    pub registry: TaskRegistry,
    percpu: Vec<PerCpuScheduler>,
    pub ipi: Arc<IpiBus>,
}

impl Scheduler {
    /// Build a scheduler for `cpu_count` CPUs, creating one idle task per
    /// CPU up front — mirrors the teacher's boot sequence in
    /// `lifecycle.rs`, where every AP gets an idle task before it ever
    /// looks at the ready queue.
    pub fn new(cpu_count: usize, ipi: Arc<IpiBus>) -> Self {
        assert!(cpu_count > 0, "scheduler needs at least one CPU");
        let registry = TaskRegistry::new();
        let mut percpu = Vec::with_capacity(cpu_count);
        for cpu in 0..cpu_count {
            let idle_id = registry.spawn_idle(cpu);
            percpu.push(PerCpuScheduler::new(cpu, idle_id));
        }
        Self { registry, percpu, ipi }
    }

    pub fn cpu_count(&self) -> usize {
        self.percpu.len()
    }

    fn cpu(&self, cpu_id: CpuId) -> SchedResult<&PerCpuScheduler> {
        self.percpu.get(cpu_id).ok_or(SchedError::UnknownCpu)
    }

    pub fn stats(&self, cpu_id: CpuId) -> SchedResult<SchedStats> {
        Ok(self.cpu(cpu_id)?.stats())
    }

    pub fn runnable_count(&self, cpu_id: CpuId) -> SchedResult<usize> {
        Ok(self.cpu(cpu_id)?.runnable_count())
    }

    pub fn current_task(&self, cpu_id: CpuId) -> SchedResult<TaskId> {
        let cpu = self.cpu(cpu_id)?;
        Ok(cpu.current().unwrap_or(cpu.idle_task))
    }

    /// Create a new task homed on the CPU with the fewest runnable tasks
    /// (spec.md §4.2's placement policy), and make it ready to run.
    pub fn spawn_task(&self, name: &'static str, nice: i8) -> SchedResult<TaskId> {
        let nice = clamp_nice(nice);
        let home = self.least_loaded_cpu();
        let id = self.registry.spawn(name, nice, home);
        self.enqueue_ready(home, id, None)?;
        Ok(id)
    }

    pub fn least_loaded_cpu(&self) -> CpuId {
        self.percpu
            .iter()
            .min_by_key(|cpu| cpu.runnable_count())
            .map(|cpu| cpu.cpu_id)
            .unwrap_or(0)
    }

    /// Insert `id` into `cpu`'s ready queue. If `vruntime_hint` is given
    /// (a waking task) it is clamped to at least `min_vruntime -
    /// WAKEUP_BONUS_CAP_NS`; a never-run task starts at the queue's
    /// current `min_vruntime`.
    pub(crate) fn enqueue_ready(&self, cpu_id: CpuId, id: TaskId, vruntime_hint: Option<u64>) -> SchedResult<()> {
        let cpu = self.cpu(cpu_id)?;
        let mut inner = cpu.inner.lock();
        let min_vruntime = inner.ready.min_vruntime();
        let (weight, placed_vruntime) = self.registry.with_task(id, |task| {
            let placed_vruntime = match vruntime_hint {
                Some(hint) => hint.max(min_vruntime.saturating_sub(WAKEUP_BONUS_CAP_NS)),
                None if !task.ever_ran => min_vruntime,
                None => task.vruntime,
            };
            task.vruntime = placed_vruntime;
            task.state = TaskState::Ready;
            task.block_reason = BlockReason::None;
            (task.weight, placed_vruntime)
        });
        let key = inner.ready.insert(id, placed_vruntime);
        self.registry.with_task(id, |task| task.order_key = Some(key));
        inner.runnable_weight += weight as u64;
        Ok(())
    }

    /// The ideal slice length for a task of `weight` given `runnable_weight`
    /// total weight currently contending for the CPU (including itself).
    fn slice_for(weight: u32, runnable_weight: u64, runnable_count: usize) -> u64 {
        if runnable_weight == 0 || runnable_count == 0 {
            return SCHED_LATENCY_NS;
        }
        let share = SCHED_LATENCY_NS.saturating_mul(weight as u64) / runnable_weight;
        share.max(MIN_GRANULARITY_NS)
    }

    /// Pop the next task to run on `cpu_id` (the idle task if the ready
    /// queue is empty), mark it `Running`, and return it.
    pub fn pick_next(&self, cpu_id: CpuId, now_ns: u64) -> SchedResult<TaskId> {
        let cpu = self.cpu(cpu_id)?;
        let mut inner = cpu.inner.lock();
        let next = inner.ready.pop_min().unwrap_or(cpu.idle_task);
        inner.current = Some(next);
        if !next.eq(&cpu.idle_task) {
            inner.stats.context_switches += 1;
            // `next` just left the ready set (it's `Running` now, not
            // `Ready`); `runnable_weight` tracks the ready set's weight
            // only, so it must come back out here, mirroring
            // `runnable_count = ready.len()`. Without this it only ever
            // grows across `reschedule`/`yield` cycles and `slice_for`'s
            // denominator diverges.
            let weight = self.registry.snapshot(next).weight as u64;
            inner.runnable_weight = inner.runnable_weight.saturating_sub(weight);
        }
        drop(inner);
        self.registry.with_task(next, |task| {
            task.state = TaskState::Running;
            task.order_key = None;
            task.scheduled_in_ns = now_ns;
            task.ever_ran = true;
            task.context_switches_in += 1;
        });
        Ok(next)
    }

    /// Charge the currently running task for the elapsed time since it
    /// was last charged, wake any sleepers due by `now_ns`, and report
    /// whether the running task should be preempted (its ideal slice has
    /// elapsed and a ready task now has a strictly smaller vruntime).
    pub fn tick(&self, cpu_id: CpuId, now_ns: u64) -> SchedResult<bool> {
        let cpu = self.cpu(cpu_id)?;

        let due = {
            let mut inner = cpu.inner.lock();
            inner.sleep.drain_due(now_ns)
        };
        for id in due {
            self.enqueue_ready(cpu_id, id, Some(self.registry.snapshot(id).vruntime))?;
        }

        let Some(current) = cpu.current() else {
            return Ok(false);
        };
        if current.eq(&cpu.idle_task) {
            let mut inner = cpu.inner.lock();
            inner.stats.idle_ticks += 1;
            return Ok(!inner.ready.is_empty());
        }

        let (runnable_weight, runnable_count) = {
            let inner = cpu.inner.lock();
            (inner.runnable_weight, inner.ready.len())
        };
        let weight = self.registry.snapshot(current).weight;
        let slice = Self::slice_for(weight, runnable_weight + weight as u64, runnable_count + 1);

        let (elapsed, charged_vruntime) = self.registry.with_task(current, |task| {
            let elapsed = now_ns.saturating_sub(task.scheduled_in_ns);
            task.scheduled_in_ns = now_ns;
            let delta_vruntime = elapsed.saturating_mul(NICE_0_LOAD) / task.weight.max(1) as u64;
            task.vruntime = task.vruntime.saturating_add(delta_vruntime);
            (elapsed, task.vruntime)
        });

        // spec.md §4.2's min_vruntime discipline: publish the running
        // task's just-charged vruntime to the watermark before anything
        // else observes it, so a concurrent unblock on another CPU (or
        // this tick's own preemption check) never compares against a
        // stale value.
        cpu.inner.lock().ready.advance_min_vruntime(charged_vruntime);

        cpu.inner.lock().stats.busy_ticks += 1;

        // spec.md §4.2: once the task has run its ideal slice (or the
        // timer was delayed enough that it overran its slice in a single
        // tick), the tick handler requests a reschedule unconditionally —
        // it never compares the running task's vruntime against the
        // ready set's minimum itself. That comparison belongs to
        // `pick_next`/`reschedule`, not here.
        let should_preempt = elapsed >= slice;
        Ok(should_preempt)
    }

    /// Like [`Scheduler::pick_next`], but tries [`crate::work_steal::try_steal`]
    /// first when the CPU's own queue is empty, so it doesn't fall back to
    /// the idle task while another CPU is backed up.
    pub fn pick_next_or_steal(&self, cpu_id: CpuId, now_ns: u64) -> SchedResult<TaskId> {
        if self.cpu(cpu_id)?.runnable_count() == 0 {
            crate::work_steal::try_steal(self, cpu_id)?;
        }
        self.pick_next(cpu_id, now_ns)
    }

    /// Move the running task back onto the ready queue and pick the next
    /// one (voluntary yield, or a tick-driven preemption).
    pub fn reschedule(&self, cpu_id: CpuId, now_ns: u64) -> SchedResult<TaskId> {
        let cpu = self.cpu(cpu_id)?;
        let current = cpu.current();
        if let Some(current) = current {
            if !current.eq(&cpu.idle_task) {
                self.enqueue_ready(cpu_id, current, None)?;
            }
        }
        self.pick_next(cpu_id, now_ns)
    }

    /// Remove the current task from the CPU and mark it blocked for
    /// `reason`. The caller is responsible for later calling
    /// [`Scheduler::unblock`].
    pub fn block_current(&self, cpu_id: CpuId, reason: BlockReason, now_ns: u64) -> SchedResult<TaskId> {
        let cpu = self.cpu(cpu_id)?;
        let current = cpu.current().ok_or(SchedError::WrongState)?;
        self.registry.with_task(current, |task| {
            task.state = TaskState::Blocked;
            task.block_reason = reason;
        });
        cpu.inner.lock().current = None;
        self.pick_next(cpu_id, now_ns)
    }

    /// Put the current task to sleep until `wake_at_ns`.
    pub fn sleep_current(&self, cpu_id: CpuId, wake_at_ns: u64, now_ns: u64) -> SchedResult<TaskId> {
        let cpu = self.cpu(cpu_id)?;
        let current = cpu.current().ok_or(SchedError::WrongState)?;
        {
            let mut inner = cpu.inner.lock();
            let key = inner.sleep.insert(current, wake_at_ns);
            self.registry.with_task(current, |task| {
                task.state = TaskState::Blocked;
                task.block_reason = BlockReason::Sleep;
                task.wake_deadline_ns = Some(wake_at_ns);
                task.order_key = Some(key);
            });
            inner.current = None;
        }
        self.pick_next(cpu_id, now_ns)
    }

    /// Make a blocked task ready again on its home CPU, sending a
    /// reschedule IPI if that CPU is currently running something with a
    /// larger vruntime (it should preempt in favour of the newly-ready
    /// task).
    pub fn unblock(&self, id: TaskId) -> SchedResult<()> {
        let (home_cpu, is_idle) = {
            let t = self.registry.snapshot(id);
            if t.state != TaskState::Blocked {
                return Err(SchedError::WrongState);
            }
            (t.home_cpu, t.is_idle)
        };
        if is_idle {
            return Err(SchedError::WrongState);
        }
        self.enqueue_ready(home_cpu, id, Some(self.registry.snapshot(id).vruntime))?;

        let cpu = self.cpu(home_cpu)?;
        let should_preempt = {
            let inner = cpu.inner.lock();
            match inner.current {
                None => true,
                Some(running) if running.eq(&cpu.idle_task) => true,
                Some(running) => {
                    self.registry.snapshot(id).vruntime < self.registry.snapshot(running).vruntime
                }
            }
        };
        if should_preempt {
            self.ipi.send(home_cpu, IpiClass::Reschedule);
        }
        Ok(())
    }

    /// Exit the current task on `cpu_id`: mark it a zombie and pick a
    /// replacement. Reaping (freeing the registry slot) is out of scope —
    /// spec.md never asks for task destruction, only exit-and-never-run-again.
    pub fn exit_current(&self, cpu_id: CpuId, now_ns: u64) -> SchedResult<TaskId> {
        let cpu = self.cpu(cpu_id)?;
        let current = cpu.current().ok_or(SchedError::WrongState)?;
        self.registry.with_task(current, |task| {
            task.state = TaskState::Zombie;
        });
        cpu.inner.lock().current = None;
        self.pick_next(cpu_id, now_ns)
    }

    /// Move `id` from `from_cpu`'s structures to `to_cpu`'s. Locks are
    /// taken in increasing CPU-index order regardless of which CPU is
    /// "from" and which is "to", so two concurrent migrations in opposite
    /// directions can't deadlock against each other (spec.md §5's dual-lock
    /// ordering requirement).
    pub fn migrate_task(&self, id: TaskId, from_cpu: CpuId, to_cpu: CpuId) -> SchedResult<()> {
        if from_cpu == to_cpu {
            return Ok(());
        }
        let (lo, hi) = if from_cpu < to_cpu {
            (from_cpu, to_cpu)
        } else {
            (to_cpu, from_cpu)
        };
        let cpu_lo = self.cpu(lo)?;
        let cpu_hi = self.cpu(hi)?;
        let mut guard_lo = cpu_lo.inner.lock();
        let mut guard_hi = cpu_hi.inner.lock();
        let (from_inner, to_inner): (&mut PerCpuInner, &mut PerCpuInner) = if from_cpu == lo {
            (&mut guard_lo, &mut guard_hi)
        } else {
            (&mut guard_hi, &mut guard_lo)
        };

        let key = self.registry.snapshot(id).order_key;
        if let Some(key) = key {
            from_inner.ready.remove(id, key);
            let weight = self.registry.snapshot(id).weight as u64;
            from_inner.runnable_weight = from_inner.runnable_weight.saturating_sub(weight);

            let target_min = to_inner.ready.min_vruntime();
            let new_key = to_inner.ready.insert(id, target_min);
            to_inner.runnable_weight += weight;

            self.registry.with_task(id, |task| {
                task.home_cpu = to_cpu;
                task.vruntime = target_min;
                task.order_key = Some(new_key);
                task.migrations += 1;
            });
        }
        Ok(())
    }

    /// The task a load balancer should pull off `cpu_id` first: the one
    /// furthest from running next.
    pub fn donation_candidate(&self, cpu_id: CpuId) -> SchedResult<Option<TaskId>> {
        Ok(self.cpu(cpu_id)?.inner.lock().ready.peek_max())
    }

    pub fn imbalance_percent(&self, from: CpuId, to: CpuId) -> SchedResult<u32> {
        let from_count = self.cpu(from)?.runnable_count();
        let to_count = self.cpu(to)?.runnable_count();
        if to_count == 0 {
            return Ok(if from_count > 0 { u32::MAX } else { 0 });
        }
        Ok(((from_count.saturating_sub(to_count)) * 100 / to_count) as u32)
    }

    pub fn is_imbalanced(&self, from: CpuId, to: CpuId) -> SchedResult<bool> {
        Ok(self.imbalance_percent(from, to)? > LOAD_IMBALANCE_PERCENT)
    }
}
