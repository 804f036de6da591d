//! Idle-triggered work stealing.
//!
//! Grounded on the teacher's `work_steal.rs` (`try_work_steal`): unlike
//! [`crate::load_balance`]'s periodic sweep, this only runs when a CPU is
//! about to go idle, and only looks at the single most-loaded other CPU
//! rather than walking every pair. It's the fast path that keeps a CPU
//! from sitting idle even for one balancer period; the periodic pass
//! handles the steady-state imbalance work stealing alone wouldn't catch.

use crate::error::SchedResult;
use crate::percpu::Scheduler;
use crate::task::{CpuId, TaskId};

/// Called when `idle_cpu` has nothing left in its own ready queue.
/// Finds the most loaded other CPU and, if it has more than one runnable
/// task (so stealing doesn't just bounce the last task back and forth),
/// migrates its donation candidate onto `idle_cpu`.
pub fn try_steal(scheduler: &Scheduler, idle_cpu: CpuId) -> SchedResult<Option<TaskId>> {
    let n = scheduler.cpu_count();
    let mut best: Option<(CpuId, usize)> = None;
    for cpu in 0..n {
        if cpu == idle_cpu {
            continue;
        }
        let depth = scheduler.runnable_count(cpu)?;
        if depth > 1 && best.map_or(true, |(_, best_depth)| depth > best_depth) {
            best = Some((cpu, depth));
        }
    }
    let Some((victim, _)) = best else {
        return Ok(None);
    };
    let Some(candidate) = scheduler.donation_candidate(victim)? else {
        return Ok(None);
    };
    scheduler.migrate_task(candidate, victim, idle_cpu)?;
    Ok(Some(candidate))
}
