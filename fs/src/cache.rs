//! Fixed-slot, LRU-evicted, reader/writer-locked block cache.
//!
//! Grounded on spec.md §4.4.1's find-or-install algorithm. The source's
//! `find_block` (per spec.md §9's open question) drops the cache lock
//! between the search and the install, letting two concurrent misses on
//! the same sector both install — violating the uniqueness invariant in
//! §8. This holds the single cache lock across the entire find-or-install
//! critical section instead (the first of the two fixes the open question
//! offers), trading install-time concurrency for a cache that can never
//! duplicate a sector. Locking style mirrors `support::sync`: a
//! `std::sync::Mutex` guarding the shared table, paired with
//! `pilotos_support::sync::CondVar` for "a slot became available" wakeups.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use pilotos_support::sync::CondVar;

use crate::blockdev::{BlockDevice, SECTOR_SIZE};
use crate::error::CacheError;

pub const CACHE_SLOTS: usize = 64;

struct Slot {
    sector: Option<u64>,
    valid: bool,
    dirty: bool,
    exclusive: bool,
    readers: u32,
    data: [u8; SECTOR_SIZE],
}

impl Slot {
    fn empty() -> Self {
        Self {
            sector: None,
            valid: false,
            dirty: false,
            exclusive: false,
            readers: 0,
            data: [0u8; SECTOR_SIZE],
        }
    }

    fn is_evictable(&self) -> bool {
        !self.exclusive && self.readers == 0
    }

    fn can_grant(&self, exclusive: bool) -> bool {
        if exclusive {
            !self.exclusive && self.readers == 0
        } else {
            !self.exclusive
        }
    }
}

struct CacheInner {
    slots: Vec<Slot>,
    /// Indices of slots with zero readers and no writer, oldest first.
    lru: VecDeque<usize>,
}

/// A grant on one cache slot. Not `Clone`/`Copy`: exactly one handle
/// exists per grant, and it must be passed back to `release`.
pub struct BufferHandle {
    slot: usize,
    exclusive: bool,
}

pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    inner: std::sync::Mutex<CacheInner>,
    cv: CondVar,
    retry_backoff: Duration,
}

impl BufferCache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self::with_retry_backoff(device, Duration::from_millis(100))
    }

    /// `retry_backoff` stands in for spec.md §4.4.1's "sleep briefly (10
    /// ticks)" when no evictable slot exists on a pass; tests pass a
    /// sub-millisecond value so an (unexercised in practice, since tests
    /// never oversubscribe the cache) retry doesn't slow the suite.
    pub fn with_retry_backoff(device: Arc<dyn BlockDevice>, retry_backoff: Duration) -> Self {
        let slots = (0..CACHE_SLOTS).map(|_| Slot::empty()).collect();
        Self {
            device,
            inner: std::sync::Mutex::new(CacheInner {
                slots,
                lru: VecDeque::new(),
            }),
            cv: CondVar::new(),
            retry_backoff,
        }
    }

    /// Find-or-install `sector`, then block until the requested access
    /// mode (`exclusive` write, or shared read) can be granted.
    ///
    /// Installing a fresh slot may have to write back the sector it
    /// evicts; a device failure there is surfaced rather than swallowed
    /// (spec.md §4.4.1/§7 treat device I/O as a propagatable error), and
    /// the evicted slot is left dirty so a later flush can retry it.
    pub fn get(&self, sector: u64, exclusive: bool) -> Result<BufferHandle, CacheError> {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(idx) = guard.slots.iter().position(|s| s.sector == Some(sector)) {
                guard.lru.retain(|&i| i != idx);
                if guard.slots[idx].can_grant(exclusive) {
                    grant(&mut guard.slots[idx], exclusive);
                    return Ok(BufferHandle { slot: idx, exclusive });
                }
                guard = self.cv.wait(guard);
                continue;
            }

            if let Some(idx) = guard.lru.pop_front() {
                writeback_if_dirty(&self.device, &mut guard.slots[idx])?;
                guard.slots[idx].sector = Some(sector);
                guard.slots[idx].valid = false;
                guard.slots[idx].dirty = false;
                grant(&mut guard.slots[idx], exclusive);
                return Ok(BufferHandle { slot: idx, exclusive });
            }

            drop(guard);
            std::thread::sleep(self.retry_backoff);
            guard = self.inner.lock().unwrap();
        }
    }

    pub fn release(&self, handle: BufferHandle) {
        let mut guard = self.inner.lock().unwrap();
        let slot = &mut guard.slots[handle.slot];
        if handle.exclusive {
            slot.exclusive = false;
        } else {
            slot.readers -= 1;
        }
        if slot.is_evictable() {
            guard.lru.push_back(handle.slot);
        }
        drop(guard);
        self.cv.broadcast();
    }

    /// Ensures contents are valid (device read on first touch) and
    /// returns a copy of the sector buffer.
    pub fn read_data(&self, handle: &BufferHandle) -> Result<[u8; SECTOR_SIZE], CacheError> {
        let mut guard = self.inner.lock().unwrap();
        self.ensure_valid_locked(&mut guard.slots[handle.slot])?;
        Ok(guard.slots[handle.slot].data)
    }

    /// Ensures contents are valid via zero-fill (no device read) and
    /// returns a copy of the sector buffer.
    pub fn zero_data(&self, handle: &BufferHandle) -> [u8; SECTOR_SIZE] {
        let mut guard = self.inner.lock().unwrap();
        let slot = &mut guard.slots[handle.slot];
        if !slot.valid {
            slot.data = [0u8; SECTOR_SIZE];
            slot.valid = true;
        }
        slot.data
    }

    pub fn mark_dirty(&self, handle: &BufferHandle) {
        self.inner.lock().unwrap().slots[handle.slot].dirty = true;
    }

    /// Ensures contents are valid, applies `f` to the live buffer, and
    /// marks the slot dirty. Used by the inode layer's write path
    /// ("fetch exclusive, memcpy in, mark dirty").
    pub fn modify<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&mut [u8; SECTOR_SIZE]) -> R,
    ) -> Result<R, CacheError> {
        let mut guard = self.inner.lock().unwrap();
        self.ensure_valid_locked(&mut guard.slots[handle.slot])?;
        let slot = &mut guard.slots[handle.slot];
        let result = f(&mut slot.data);
        slot.dirty = true;
        Ok(result)
    }

    fn ensure_valid_locked(&self, slot: &mut Slot) -> Result<(), CacheError> {
        if slot.valid {
            return Ok(());
        }
        let sector = slot.sector.expect("ensure_valid on an uninstalled slot");
        self.device
            .read(sector, &mut slot.data)
            .map_err(CacheError::Device)?;
        slot.valid = true;
        Ok(())
    }

    /// Background flush daemon body: writes back every dirty slot and
    /// clears its dirty flag. Never evicts. Call on whatever cadence the
    /// caller chooses (spec.md §4.4.1 names 30 seconds for production
    /// wiring; tests call it directly instead of waiting on a real
    /// timer).
    pub fn flush_all(&self) -> Result<(), CacheError> {
        let mut guard = self.inner.lock().unwrap();
        for slot in guard.slots.iter_mut() {
            writeback_if_dirty(&self.device, slot)?;
        }
        Ok(())
    }
}

fn grant(slot: &mut Slot, exclusive: bool) {
    if exclusive {
        slot.exclusive = true;
    } else {
        slot.readers += 1;
    }
}

/// Writes a dirty slot back and clears its flag only once the write has
/// actually landed; on failure `dirty` stays set so the next flush (or
/// the next eviction attempt) retries instead of losing the update.
fn writeback_if_dirty(device: &Arc<dyn BlockDevice>, slot: &mut Slot) -> Result<(), CacheError> {
    if slot.dirty {
        if let Some(sector) = slot.sector {
            device.write(sector, &slot.data).map_err(CacheError::Device)?;
        }
        slot.dirty = false;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::blockdev::MemoryBlockDevice;

    fn small_cache(sectors: u64) -> BufferCache {
        BufferCache::with_retry_backoff(
            Arc::new(MemoryBlockDevice::new(sectors)),
            Duration::from_micros(50),
        )
    }

    #[test]
    fn write_then_release_then_reread_returns_last_bytes() {
        let cache = small_cache(8);
        let h = cache.get(3, true).unwrap();
        cache
            .modify(&h, |buf| buf[0] = 0x42)
            .unwrap();
        cache.mark_dirty(&h);
        cache.release(h);

        let h2 = cache.get(3, false).unwrap();
        let data = cache.read_data(&h2).unwrap();
        cache.release(h2);
        assert_eq!(data[0], 0x42);
    }

    #[test]
    fn two_misses_on_same_sector_never_duplicate_a_slot() {
        let cache = Arc::new(small_cache(16));
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let h = cache.get(7, false).unwrap();
                thread::sleep(Duration::from_millis(5));
                cache.release(h);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let guard = cache.inner.lock().unwrap();
        let count = guard.slots.iter().filter(|s| s.sector == Some(7)).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn exclusive_handle_excludes_all_other_access() {
        let cache = Arc::new(small_cache(4));
        let h = cache.get(1, true).unwrap();
        let cache2 = Arc::clone(&cache);
        let got_in = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let got_in2 = Arc::clone(&got_in);
        let waiter = thread::spawn(move || {
            let h2 = cache2.get(1, false).unwrap();
            got_in2.store(true, std::sync::atomic::Ordering::SeqCst);
            cache2.release(h2);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!got_in.load(std::sync::atomic::Ordering::SeqCst));
        cache.release(h);
        waiter.join().unwrap();
        assert!(got_in.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn sixty_four_concurrent_holders_on_distinct_sectors_all_succeed() {
        let cache = Arc::new(small_cache(CACHE_SLOTS as u64));
        let barrier = Arc::new(Barrier::new(CACHE_SLOTS));
        let mut handles = Vec::new();
        for sector in 0..CACHE_SLOTS as u64 {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let h = cache.get(sector, true).unwrap();
                cache.release(h);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn flush_writes_back_dirty_slots_without_evicting() {
        let cache = small_cache(4);
        let h = cache.get(0, true).unwrap();
        cache.modify(&h, |buf| buf[0] = 9).unwrap();
        cache.release(h);
        cache.flush_all().unwrap();

        let guard = cache.inner.lock().unwrap();
        assert!(!guard.slots[0].dirty);
        assert_eq!(guard.slots[0].sector, Some(0));
    }

    #[test]
    fn flush_surfaces_device_write_failure_and_keeps_slot_dirty() {
        let cache = BufferCache::with_retry_backoff(
            Arc::new(crate::blockdev::FailingBlockDevice::new(4)),
            Duration::from_micros(50),
        );
        let h = cache.get(0, true).unwrap();
        cache.modify(&h, |buf| buf[0] = 9).unwrap();
        cache.release(h);

        assert_eq!(
            cache.flush_all(),
            Err(CacheError::Device(crate::blockdev::BlockDeviceError::Io))
        );

        let guard = cache.inner.lock().unwrap();
        assert!(guard.slots[0].dirty);
    }
}
