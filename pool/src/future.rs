//! The future: spec.md §3's submission record plus §4.5's three-state
//! lifecycle (submitted / executing / completed).
//!
//! The spec's `Future` struct carries `task + arg`, a result slot, status,
//! an owning-pool pointer, a submitting-worker pointer, and a queue link.
//! This splits that into a type-erased [`Job`] trait object (what the
//! shared queue actually stores — one pool serves futures of many
//! concrete result types) and a typed [`PoolFuture`] handle (what
//! `submit` hands back to the caller, still pointing at the same
//! allocation). Grounded on the teacher's `futex.rs` wake/wait shape,
//! translated from task-blocking primitives to `std::sync::Condvar`
//! since the pool has no hardware coupling to model (see DESIGN.md).

use std::sync::Mutex;

use pilotos_support::sync::CondVar;

/// Identifies a worker thread for the "did I submit this from inside the
/// pool" check in `get`. `None` means "submitted from outside the pool".
pub type WorkerId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    Submitted,
    Executing,
    Completed,
}

struct Inner<T> {
    status: FutureStatus,
    task: Option<Box<dyn FnOnce() -> T + Send>>,
    result: Option<T>,
}

/// Type-erased queue entry. The pool's shared FIFO (really a LIFO — see
/// `ThreadPool`) holds `Arc<dyn Job>` so it can hold futures of different
/// result types at once; a worker or a helping `get` calls `execute` on
/// whichever entry it removed.
pub(crate) trait Job: Send + Sync {
    fn status(&self) -> FutureStatus;
    /// Run the task, store the result, mark completed, and wake anyone
    /// blocked in `get`. Caller must have already removed this job from
    /// the shared queue — `execute` does not touch queue membership.
    fn execute(&self);
    fn submitting_worker(&self) -> Option<WorkerId>;
}

/// A submitted unit of work. `submit` returns one of these; `get` blocks
/// (or helps) until its result is ready.
pub struct Future<T> {
    state: Mutex<Inner<T>>,
    cv: CondVar,
    submitting_worker: Option<WorkerId>,
}

impl<T: Send + 'static> Future<T> {
    pub(crate) fn new(
        task: Box<dyn FnOnce() -> T + Send>,
        submitting_worker: Option<WorkerId>,
    ) -> Self {
        Self {
            state: Mutex::new(Inner {
                status: FutureStatus::Submitted,
                task: Some(task),
                result: None,
            }),
            cv: CondVar::new(),
            submitting_worker,
        }
    }

    pub fn status(&self) -> FutureStatus {
        self.state.lock().unwrap().status
    }

    pub fn submitting_worker(&self) -> Option<WorkerId> {
        self.submitting_worker
    }

    /// Block until `execute` has stored a result (by a worker, or by this
    /// call itself helping — see `ThreadPool::get`), then return it. A
    /// future is consumed by exactly one `get`.
    pub(crate) fn wait_for_result(&self) -> T {
        let mut guard = self.state.lock().unwrap();
        while guard.status != FutureStatus::Completed {
            guard = self.cv.wait(guard);
        }
        guard.result.take().expect("completed future must carry a result")
    }
}

impl<T: Send + 'static> Job for Future<T> {
    fn status(&self) -> FutureStatus {
        Future::status(self)
    }

    fn execute(&self) {
        let task = {
            let mut guard = self.state.lock().unwrap();
            guard.status = FutureStatus::Executing;
            guard.task.take()
        };
        if let Some(task) = task {
            let result = task();
            let mut guard = self.state.lock().unwrap();
            guard.result = Some(result);
            guard.status = FutureStatus::Completed;
        }
        self.cv.broadcast();
    }

    fn submitting_worker(&self) -> Option<WorkerId> {
        self.submitting_worker
    }
}
