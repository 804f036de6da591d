//! Blocking synchronization primitives: counting semaphore, non-reentrant
//! mutex with holder tracking, condition variable.
//!
//! Grounded on spec.md §4.1 and the teacher's `lib/src/waitqueue.rs`
//! (`wait_event`/`wake_one`/`wake_all`, FIFO waiter semantics). The
//! teacher's version blocks a *kernel task* by removing it from its CPU's
//! ready queue; these run on real OS threads instead (there is no
//! in-process task scheduler whose suspension points these could hook
//! into without a full cooperative-task executor, which is out of scope
//! here — see `sched::percpu::Scheduler` for the cooperative model used to
//! test scheduler fairness in isolation). The observable contract is the
//! same either way: `down`/`lock`/`wait` block the caller until the
//! condition holds, `up`/`unlock`/`signal`/`broadcast` wake waiters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex as StdMutex, MutexGuard};

use self::internal::TaskToken;

pub mod internal {
    //! A stand-in for "current thread identity" used only to detect
    //! reentrant mutex acquisition, mirroring the teacher's
    //! `held_by_current_context` check.
    use std::thread::ThreadId;

    pub type TaskToken = ThreadId;

    pub fn current_token() -> TaskToken {
        std::thread::current().id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    Deadlock,
}

/// Counting semaphore with FIFO-ish wakeups (a `Condvar::notify_one`
/// wakes whichever waiter the OS scheduler picks, same as the teacher's
/// own waiter list does not guarantee strict FIFO once multiple threads
/// race to reacquire — see spec.md §9's fairness open question).
pub struct Semaphore {
    state: StdMutex<i64>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: i64) -> Self {
        Self {
            state: StdMutex::new(initial),
            cv: Condvar::new(),
        }
    }

    pub fn try_down(&self) -> bool {
        let mut v = self.state.lock().unwrap();
        if *v > 0 {
            *v -= 1;
            true
        } else {
            false
        }
    }

    pub fn down(&self) {
        let mut v = self.state.lock().unwrap();
        while *v <= 0 {
            v = self.cv.wait(v).unwrap();
        }
        *v -= 1;
    }

    pub fn up(&self) {
        let mut v = self.state.lock().unwrap();
        *v += 1;
        self.cv.notify_one();
    }

    pub fn value(&self) -> i64 {
        *self.state.lock().unwrap()
    }
}

/// Binary semaphore with holder tracking: a thread that already holds
/// the lock gets `SyncError::Deadlock` back instead of hanging, matching
/// spec.md §4.1's "fails with Deadlock (lock held by self)" contract.
pub struct Mutex {
    sem: Semaphore,
    holder: StdMutex<Option<TaskToken>>,
}

pub struct MutexHandle<'a> {
    mutex: &'a Mutex,
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
            holder: StdMutex::new(None),
        }
    }

    pub fn lock(&self) -> Result<MutexHandle<'_>, SyncError> {
        let me = internal::current_token();
        if *self.holder.lock().unwrap() == Some(me) {
            return Err(SyncError::Deadlock);
        }
        self.sem.down();
        *self.holder.lock().unwrap() = Some(me);
        Ok(MutexHandle { mutex: self })
    }

    pub fn held_by_current(&self) -> bool {
        *self.holder.lock().unwrap() == Some(internal::current_token())
    }

    fn unlock(&self) {
        *self.holder.lock().unwrap() = None;
        self.sem.up();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Drop for MutexHandle<'a> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// Condition variable layered on a raw [`StdMutex`] guard, for callers
/// that want the teacher's `wait(cv, lock)` two-argument shape rather
/// than pairing a [`Condvar`] with exactly one [`StdMutex`].
pub struct CondVar {
    inner: Condvar,
    generation: AtomicU64,
}

impl CondVar {
    pub fn new() -> Self {
        Self {
            inner: Condvar::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Atomically release `guard` and block until `signal`/`broadcast` is
    /// called, then reacquire and return a fresh guard.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let before = self.generation.load(Ordering::SeqCst);
        let (guard, _timeout) = self
            .inner
            .wait_timeout_while(guard, std::time::Duration::from_secs(3600), |_| {
                self.generation.load(Ordering::SeqCst) == before
            })
            .unwrap();
        guard
    }

    pub fn signal(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.notify_one();
    }

    pub fn broadcast(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.notify_all();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn semaphore_blocks_until_up() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            sem2.down();
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        sem.up();
        handle.join().unwrap();
    }

    #[test]
    fn mutex_rejects_reentrant_lock_same_thread() {
        let mutex = Mutex::new();
        let _h = mutex.lock().unwrap();
        assert_eq!(mutex.lock().map(|_| ()), Err(SyncError::Deadlock));
    }

    #[test]
    fn mutex_serializes_across_threads() {
        let mutex = Arc::new(Mutex::new());
        let counter = Arc::new(StdMutex::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _h = mutex.lock().unwrap();
                    *counter.lock().unwrap() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 1600);
    }

    #[test]
    fn condvar_wakes_waiter_on_signal() {
        let mutex = Arc::new(StdMutex::new(false));
        let cv = Arc::new(CondVar::new());
        let mutex2 = Arc::clone(&mutex);
        let cv2 = Arc::clone(&cv);
        let handle = thread::spawn(move || {
            let mut guard = mutex2.lock().unwrap();
            while !*guard {
                guard = cv2.wait(guard);
            }
        });
        thread::sleep(Duration::from_millis(20));
        *mutex.lock().unwrap() = true;
        cv.signal();
        handle.join().unwrap();
    }
}
