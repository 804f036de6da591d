//! Ticket-lock mutex and writer-preferring reader/writer lock.
//!
//! These are kernel-style primitives: callers are expected to hold them
//! only across short critical sections, never across a suspension point
//! (spec.md §5). Unlike `slopos-lib::IrqMutex` this port has no interrupt
//! flags to save/restore (there is no interrupt context in a host
//! simulation), but the ticket-lock algorithm — FIFO ordering via a
//! monotonically increasing ticket, proportional backoff while spinning —
//! is carried over unchanged.

use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::thread::ThreadId;

/// FIFO mutual-exclusion lock for short critical sections.
///
/// `holder` tracks which thread currently owns the lock, purely to
/// detect the nested-acquire-by-the-same-context case spec.md §4.1 calls
/// out ("nested acquires by the same context are forbidden (detected and
/// reported)") — a plain ticket lock would otherwise just spin forever
/// against its own already-taken ticket.
pub struct SpinLock<T> {
    next_ticket: AtomicU64,
    now_serving: AtomicU64,
    holder: StdMutex<Option<ThreadId>>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            now_serving: AtomicU64::new(0),
            holder: StdMutex::new(None),
            data: UnsafeCell::new(data),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Whether the calling thread is the one currently holding this lock
    /// (spec.md §4.1's `held_by_current_context`).
    pub fn held_by_current_context(&self) -> bool {
        *self.holder.lock().unwrap() == Some(std::thread::current().id())
    }

    #[inline]
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let me = std::thread::current().id();
        if *self.holder.lock().unwrap() == Some(me) {
            panic!("SpinLock: nested acquire by the same thread at {}", std::panic::Location::caller());
        }
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        loop {
            let serving = self.now_serving.load(Ordering::Acquire);
            if serving == my_ticket {
                break;
            }
            let distance = my_ticket.wrapping_sub(serving).min(64);
            for _ in 0..distance {
                spin_loop();
            }
        }
        *self.holder.lock().unwrap() = Some(me);
        SpinLockGuard { lock: self }
    }

    #[track_caller]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let me = std::thread::current().id();
        if *self.holder.lock().unwrap() == Some(me) {
            panic!("SpinLock: nested acquire by the same thread at {}", std::panic::Location::caller());
        }
        let current = self.now_serving.load(Ordering::Relaxed);
        if self
            .next_ticket
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            *self.holder.lock().unwrap() = Some(me);
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        *self.lock.holder.lock().unwrap() = None;
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

/// Writer-preferring reader/writer lock: once a writer is queued, new
/// readers yield rather than pile on, preventing writer starvation under
/// steady read traffic.
pub struct RwSpinLock<T> {
    state: AtomicI32,
    writer_waiting: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwSpinLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}

pub struct RwSpinLockReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

pub struct RwSpinLockWriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> RwSpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            state: AtomicI32::new(0),
            writer_waiting: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn read(&self) -> RwSpinLockReadGuard<'_, T> {
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state >= 0 && self.writer_waiting.load(Ordering::Relaxed) == 0 {
                if self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return RwSpinLockReadGuard { lock: self };
                }
            }
            spin_loop();
        }
    }

    pub fn write(&self) -> RwSpinLockWriteGuard<'_, T> {
        self.writer_waiting.fetch_add(1, Ordering::Relaxed);
        loop {
            if self
                .state
                .compare_exchange_weak(0, -1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.writer_waiting.fetch_sub(1, Ordering::Relaxed);
                return RwSpinLockWriteGuard { lock: self };
            }
            spin_loop();
        }
    }

    pub fn try_write(&self) -> Option<RwSpinLockWriteGuard<'_, T>> {
        if self
            .state
            .compare_exchange(0, -1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(RwSpinLockWriteGuard { lock: self })
        } else {
            None
        }
    }
}

impl<'a, T> Deref for RwSpinLockReadGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for RwSpinLockReadGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

impl<'a, T> Deref for RwSpinLockWriteGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for RwSpinLockWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for RwSpinLockWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ticket_lock_serializes_increments() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn held_by_current_context_is_true_only_while_locked() {
        let lock = SpinLock::new(0u64);
        assert!(!lock.held_by_current_context());
        let guard = lock.lock();
        assert!(lock.held_by_current_context());
        drop(guard);
        assert!(!lock.held_by_current_context());
    }

    #[test]
    #[should_panic(expected = "nested acquire")]
    fn nested_acquire_by_same_thread_panics() {
        let lock = SpinLock::new(0u64);
        let _outer = lock.lock();
        let _inner = lock.lock();
    }

    #[test]
    fn rwlock_allows_concurrent_readers() {
        let lock = RwSpinLock::new(5);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
        drop(r1);
        drop(r2);
        let mut w = lock.write();
        *w = 9;
        drop(w);
        assert_eq!(*lock.read(), 9);
    }
}
