//! Fork/join thread pool: component E. A single shared queue of futures,
//! N worker threads, and help-if-needed semantics in `get` so fork-join
//! recursion can't deadlock even when every worker is blocked waiting on
//! a future it itself submitted (spec.md §8 scenario 6).
//!
//! Grounded on spec.md §4.5 directly; the wake/wait shape (one shared
//! condition, FIFO-ish queue, lock-protected metadata) follows the same
//! pattern as `support::sync` and the teacher's `futex.rs`/`waitqueue.rs`,
//! translated to `std::thread` since the pool has no hardware coupling to
//! model (see DESIGN.md's §1.2/§4.5 notes).

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use pilotos_support::sync::CondVar;
use pilotos_support::{klog_debug, klog_info};

use crate::error::{PoolError, PoolResult};
use crate::future::{Future, FutureStatus, Job, WorkerId};

thread_local! {
    /// Set once, for the lifetime of a worker thread, to that worker's
    /// id. `None` on every other thread (including the thread that
    /// constructed the pool, unless that thread happens to also be a
    /// worker — it never is, workers are spawned by `new`).
    static CURRENT_WORKER: Cell<Option<WorkerId>> = Cell::new(None);
}

/// A handle to a submitted future, returned by [`ThreadPool::submit`].
/// Consumed by exactly one [`ThreadPool::get`] call.
pub struct PoolFuture<T> {
    inner: Arc<Future<T>>,
}

impl<T: Send + 'static> PoolFuture<T> {
    pub fn status(&self) -> FutureStatus {
        self.inner.status()
    }
}

struct Shared {
    queue: Mutex<VecDeque<Arc<dyn Job>>>,
    cv: CondVar,
    shutdown: AtomicBool,
}

/// Worker threads block on one condvar shared with `submit`'s wakeup and
/// `shutdown`'s broadcast; `queue` append/pop uses `std::sync::Mutex`
/// directly rather than `pilotos_support::SpinLock` since workers block
/// here for potentially long stretches (spinning would be wasteful —
/// same reasoning `fs::BufferCache` uses for its slot waits).
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl ThreadPool {
    pub fn new(worker_count: usize) -> Arc<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cv: CondVar::new(),
            shutdown: AtomicBool::new(false),
        });

        let pool = Arc::new(Self {
            shared: Arc::clone(&shared),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        });

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = Arc::clone(&shared);
            handles.push(
                thread::Builder::new()
                    .name(format!("pool-worker-{id}"))
                    .spawn(move || {
                        CURRENT_WORKER.with(|c| c.set(Some(id)));
                        worker_loop(&shared, id);
                    })
                    .expect("spawning a pool worker thread"),
            );
        }
        *pool.workers.lock().unwrap() = handles;
        klog_info!("thread pool started with {} workers", worker_count);
        pool
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Submit a task. Records the calling thread's worker id (if it is
    /// one of this pool's own workers) so `get` can later decide whether
    /// to help. Returns `PoolError::PoolShutdown` if shutdown has already
    /// been observed.
    pub fn submit<T, F>(&self, task: F) -> PoolResult<PoolFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(PoolError::PoolShutdown);
        }
        let submitter = CURRENT_WORKER.with(|c| c.get());
        let future = Arc::new(Future::new(Box::new(task), submitter));
        let job: Arc<dyn Job> = Arc::clone(&future) as Arc<dyn Job>;

        {
            let mut guard = self.shared.queue.lock().unwrap();
            if self.shared.shutdown.load(Ordering::SeqCst) {
                return Err(PoolError::PoolShutdown);
            }
            guard.push_back(job);
        }
        self.shared.cv.signal();
        Ok(PoolFuture { inner: future })
    }

    /// Block until `future`'s result is ready, helping inline if this
    /// thread is itself the worker that submitted it and the future
    /// hasn't been picked up yet (spec.md §4.5's deadlock-avoidance
    /// rule for fork-join recursion).
    pub fn get<T: Send + 'static>(&self, future: PoolFuture<T>) -> T {
        let same_worker = future.inner.submitting_worker().is_some()
            && CURRENT_WORKER.with(|c| c.get()) == future.inner.submitting_worker();

        if same_worker {
            let job: Arc<dyn Job> = Arc::clone(&future.inner) as Arc<dyn Job>;
            let mut guard = self.shared.queue.lock().unwrap();
            let pos = guard.iter().position(|queued| Arc::ptr_eq(queued, &job));
            if let Some(pos) = pos {
                guard.remove(pos);
                drop(guard);
                klog_debug!("get() helping: running own submission inline");
                future.inner.execute();
            }
        }

        future.inner.wait_for_result()
    }

    /// Signal shutdown, wake every worker, and join all of them. Safe to
    /// call more than once. After this returns, `submit` always fails
    /// with `PoolShutdown`.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cv.broadcast();
        let mut handles = self.workers.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        klog_info!("thread pool shut down");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, _id: WorkerId) {
    loop {
        let mut guard = shared.queue.lock().unwrap();
        loop {
            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if let Some(job) = guard.pop_back() {
                drop(guard);
                job.execute();
                break;
            }
            guard = shared.cv.wait(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn submit_then_get_returns_result() {
        let pool = ThreadPool::new(2);
        let future = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(pool.get(future), 4);
        pool.shutdown();
    }

    #[test]
    fn many_tasks_all_complete() {
        let pool = ThreadPool::new(4);
        let futures: Vec<_> = (0..200)
            .map(|i| pool.submit(move || i * i).unwrap())
            .collect();
        let results: Vec<i64> = futures.into_iter().map(|f| pool.get(f)).collect();
        for (i, r) in results.into_iter().enumerate() {
            assert_eq!(r, (i * i) as i64);
        }
        pool.shutdown();
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = ThreadPool::new(1);
        pool.shutdown();
        assert_eq!(pool.submit(|| 1).err(), Some(PoolError::PoolShutdown));
    }

    /// spec.md §8 scenario 6, cut down to a size that still exercises
    /// "all workers simultaneously blocked in get" without the full
    /// 3-million-element run taking real wall-clock time in CI.
    #[test]
    fn parallel_sum_matches_sequential_with_recursive_fork_join() {
        const N: usize = 200_000;
        const GRANULARITY: usize = 500;
        let data: Vec<i64> = (0..N as i64).collect();
        let expected: i64 = data.iter().sum();

        let pool = ThreadPool::new(8);
        let result = fork_join_sum(&pool, &data, GRANULARITY);
        assert_eq!(result, expected);
        pool.shutdown();
    }

    fn fork_join_sum(pool: &ThreadPool, data: &[i64], granularity: usize) -> i64 {
        if data.len() <= granularity {
            return data.iter().sum();
        }
        let mid = data.len() / 2;
        let (left, right) = data.split_at(mid);
        let left_owned = left.to_vec();

        // Submit the left half to the pool; recurse directly on the right
        // half on this thread, exactly like a classic fork-join split.
        let left_future = pool
            .submit(move || fork_join_sum_standalone(&left_owned, granularity))
            .unwrap();
        let right_sum = fork_join_sum(pool, right, granularity);
        let left_sum = pool.get(left_future);
        left_sum + right_sum
    }

    /// A free function so the submitted closure doesn't need to borrow
    /// `pool` (which would fight the pool's own lifetime inside `submit`'s
    /// `'static` bound) for the leaf-level recursive calls.
    fn fork_join_sum_standalone(data: &[i64], granularity: usize) -> i64 {
        if data.len() <= granularity {
            return data.iter().sum();
        }
        let mid = data.len() / 2;
        let (left, right) = data.split_at(mid);
        fork_join_sum_standalone(left, granularity) + fork_join_sum_standalone(right, granularity)
    }

    #[test]
    fn all_workers_blocked_in_get_does_not_deadlock() {
        // Every worker submits one task and immediately blocks in `get`
        // on it before any worker can steal another's work from the
        // queue -- the scenario `get`'s help-if-needed logic exists for.
        const WORKERS: usize = 16;
        let pool = ThreadPool::new(WORKERS);
        let counter = Arc::new(AtomicUsize::new(0));

        let outer_futures: Vec<_> = (0..WORKERS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(move || counter.fetch_add(1, Ordering::SeqCst))
            })
            .map(Result::unwrap)
            .collect();

        for f in outer_futures {
            pool.get(f);
        }
        assert_eq!(counter.load(Ordering::SeqCst), WORKERS);
        pool.shutdown();
    }
}
