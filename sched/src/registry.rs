//! Owning arena of every task in the system.
//!
//! Grounded on the teacher's `TaskManagerInner` (`task.rs`), which keeps
//! every `Task` in one fixed array behind a single lock rather than
//! scattering ownership across whichever structure currently references
//! it. This port keeps that single-owner shape but grows the array on
//! demand instead of using a fixed `MAX_TASKS`, and hands callers a
//! `TaskId` instead of a raw pointer into the array.

use pilotos_support::SpinLock;

use crate::task::{CpuId, Task, TaskId};

pub struct TaskRegistry {
    tasks: SpinLock<Vec<Task>>,
    next_id: SpinLock<u32>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: SpinLock::new(Vec::new()),
            next_id: SpinLock::new(0),
        }
    }

    fn allocate_id(&self) -> TaskId {
        let mut next = self.next_id.lock();
        let id = TaskId(*next);
        *next += 1;
        id
    }

    /// Create and register a new task, returning its id.
    pub fn spawn(&self, name: &'static str, nice: i8, home_cpu: CpuId) -> TaskId {
        let id = self.allocate_id();
        let task = Task::new(id, name, nice, home_cpu);
        let mut tasks = self.tasks.lock();
        debug_assert_eq!(tasks.len(), id.0 as usize);
        tasks.push(task);
        id
    }

    pub fn spawn_idle(&self, home_cpu: CpuId) -> TaskId {
        let id = self.allocate_id();
        let task = Task::idle(id, home_cpu);
        let mut tasks = self.tasks.lock();
        debug_assert_eq!(tasks.len(), id.0 as usize);
        tasks.push(task);
        id
    }

    /// Run `f` with exclusive access to the task's record. Panics if `id`
    /// is out of range, mirroring an out-of-bounds array index on the
    /// teacher's fixed `Task` table.
    pub fn with_task<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> R {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(id.0 as usize)
            .unwrap_or_else(|| panic!("{id} not present in registry"));
        f(task)
    }

    /// Clone out a snapshot of a task's current fields, for read-mostly
    /// callers (stats reporting, load-balancer imbalance checks) that
    /// don't need the registry lock held across their own work.
    pub fn snapshot(&self, id: TaskId) -> Task {
        self.tasks.lock()[id.0 as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
