//! End-to-end scenario tests: spec.md §8's six named scenarios, each
//! exercising the three core components (scheduler, buffer cache +
//! inode, thread pool) the way a single-process integration test would,
//! rather than one crate's own unit tests. Registered as a
//! `support::testing::TestSuiteDesc` by [`crate::all_suites`], the same
//! shape the teacher's `builtin-tests` feature runs in place of a host
//! test runner (see SPEC_FULL.md §1.1).

use std::collections::HashMap;
use std::sync::Arc;

use pilotos_fs::{BufferCache, FreeSectorMap, InodeTable, MemoryBlockDevice};
use pilotos_pool::ThreadPool;
use pilotos_sched::{config::SCHED_LATENCY_NS, Scheduler};
use pilotos_support::clock::NSEC_PER_TICK;
use pilotos_support::ipi::IpiBus;
use pilotos_support::testing::TestResult;
use pilotos_support::{assert_eq_test, assert_test};

fn new_scheduler(cpus: usize) -> Scheduler {
    Scheduler::new(cpus, Arc::new(IpiBus::new(cpus)))
}

/// Scenario 1: two nice-0, compute-bound tasks on one CPU split roughly
/// evenly over a long run.
pub fn fair_split_two_nice_zero_tasks() -> TestResult {
    let sched = new_scheduler(1);
    let a = sched.spawn_task("a", 0).unwrap();
    let b = sched.spawn_task("b", 0).unwrap();

    let mut ticks_for: HashMap<_, u64> = HashMap::new();
    ticks_for.insert(a, 0);
    ticks_for.insert(b, 0);

    let mut now = 0u64;
    let mut current = sched.pick_next(0, now).unwrap();
    for _ in 0..4_000 {
        now += NSEC_PER_TICK;
        let preempt = sched.tick(0, now).unwrap();
        *ticks_for.get_mut(&current).unwrap() += 1;
        if preempt {
            current = sched.reschedule(0, now).unwrap();
        }
    }

    let ta = *ticks_for.get(&a).unwrap() as f64;
    let tb = *ticks_for.get(&b).unwrap() as f64;
    let frac_a = ta / (ta + tb);
    assert_test!((0.45..=0.55).contains(&frac_a));
    TestResult::Pass
}

/// Scenario 2: nice -20 against nice +19 ends up CPU-share-dominant by
/// (approximately) their weight ratio, ~88761/15.
pub fn nice_skew_extreme_ratio() -> TestResult {
    let sched = new_scheduler(1);
    let lo = sched.spawn_task("lo", -20).unwrap();
    let hi = sched.spawn_task("hi", 19).unwrap();

    let mut ticks_for: HashMap<_, u64> = HashMap::new();
    ticks_for.insert(lo, 0);
    ticks_for.insert(hi, 0);

    let mut now = 0u64;
    let mut current = sched.pick_next(0, now).unwrap();
    for _ in 0..200_000 {
        now += NSEC_PER_TICK;
        let preempt = sched.tick(0, now).unwrap();
        *ticks_for.get_mut(&current).unwrap() += 1;
        if preempt {
            current = sched.reschedule(0, now).unwrap();
        }
    }

    let t_lo = *ticks_for.get(&lo).unwrap();
    let t_hi = *ticks_for.get(&hi).unwrap();
    let ratio = t_lo as f64 / t_hi.max(1) as f64;
    assert_test!(ratio >= 1000.0);
    TestResult::Pass
}

/// Scenario 3: A runs alone for a second while B sleeps 5s; B preempts A
/// immediately on waking (sleeper bonus places it well below A's
/// vruntime), and A runs again within roughly one `sched_latency`.
pub fn sleeper_bonus_preempts_then_rebalances() -> TestResult {
    let sched = new_scheduler(1);

    // B exists first, becomes current momentarily only so it can call
    // into `sleep_current` (which operates on "the CPU's current task"),
    // then sleeps for 5 simulated seconds.
    let b = sched.spawn_task("b", 0).unwrap();
    let first = sched.pick_next(0, 0).unwrap();
    assert_eq_test!(first, b);
    let wake_at_ns = 5_000_000_000u64;
    sched.sleep_current(0, wake_at_ns, 0).unwrap();

    let a = sched.spawn_task("a", 0).unwrap();
    let mut current = sched.reschedule(0, 0).unwrap();
    assert_eq_test!(current, a);

    let mut now = 0u64;
    loop {
        now += NSEC_PER_TICK;
        let preempt = sched.tick(0, now).unwrap();
        if preempt {
            current = sched.reschedule(0, now).unwrap();
        }
        if now >= wake_at_ns {
            break;
        }
    }
    assert_eq_test!(current, b);

    let safety_cap = (SCHED_LATENCY_NS / NSEC_PER_TICK) * 4;
    let mut ticks_since_wake = 0u64;
    while current != a && ticks_since_wake < safety_cap {
        now += NSEC_PER_TICK;
        let preempt = sched.tick(0, now).unwrap();
        ticks_since_wake += 1;
        if preempt {
            current = sched.reschedule(0, now).unwrap();
        }
    }
    assert_eq_test!(current, a);
    TestResult::Pass
}

/// Scenario 4: a sparse write far past the current end of file extends
/// length, leaves everything before it reading as zero, and only
/// consumes a handful of sectors from the free map along the way.
pub fn sparse_inode_write_past_ten_mib() -> TestResult {
    let total_sectors = 25_000u64;
    let device = Arc::new(MemoryBlockDevice::new(total_sectors));
    let cache = BufferCache::new(device);
    let free = FreeSectorMap::new(total_sectors, 1);
    let table = InodeTable::new(cache, free);

    let inode = table.create(false).unwrap();
    table.open(inode).unwrap();
    let free_before = table.free_map().free_count();

    let offset = 10 * 1024 * 1024u64;
    let written = table.write(inode, offset, b"X", 0).unwrap();
    assert_eq_test!(written, 1);
    assert_eq_test!(table.length(inode).unwrap(), offset as i64 + 1);

    let mut zeros = vec![0u8; 4096];
    let mut pos = 0u64;
    while pos < offset {
        let chunk = (offset - pos).min(zeros.len() as u64) as usize;
        let n = table.read(inode, pos, &mut zeros[..chunk]).unwrap();
        assert_test!(zeros[..n].iter().all(|&b| b == 0));
        pos += chunk as u64;
    }

    let mut one = [0u8; 1];
    table.read(inode, offset, &mut one).unwrap();
    assert_eq_test!(one[0], b'X');

    let free_after = table.free_map().free_count();
    assert_test!(free_before - free_after <= 4);

    table.close(inode).unwrap();
    TestResult::Pass
}

/// Scenario 5: sequentially reading 1024 distinct sectors through a
/// 64-slot cache succeeds for all of them, and flushing then rereading
/// each one reproduces the original bytes (eviction never silently drops
/// a write).
pub fn cache_eviction_under_pressure() -> TestResult {
    const TOTAL_SECTORS: u64 = 1024;
    let device = Arc::new(MemoryBlockDevice::new(TOTAL_SECTORS));
    let cache = BufferCache::new(device);

    for sector in 0..TOTAL_SECTORS {
        let h = cache.get(sector, true).unwrap();
        let marker = (sector % 251) as u8;
        cache.modify(&h, |buf| buf[0] = marker).unwrap();
        cache.release(h);
    }

    cache.flush_all().unwrap();

    for sector in 0..TOTAL_SECTORS {
        let h = cache.get(sector, false).unwrap();
        let data = cache.read_data(&h).unwrap();
        let byte = data[0];
        cache.release(h);
        assert_eq_test!(byte, (sector % 251) as u8);
    }
    TestResult::Pass
}

/// Scenario 6: a parallel sum over 3,000,000 ints with granularity 100 on
/// a 32-worker pool matches the sequential sum and completes even though
/// every worker can end up blocked in `get` at once.
pub fn fork_join_parallel_sum_matches_sequential() -> TestResult {
    const N: usize = 3_000_000;
    const GRANULARITY: usize = 100;

    let data: Vec<i64> = (0..N as i64).collect();
    let expected: i64 = data.iter().sum();

    let pool = ThreadPool::new(32);
    let actual = fork_join_sum(&pool, &data, GRANULARITY);
    pool.shutdown();

    assert_eq_test!(actual, expected);
    TestResult::Pass
}

fn fork_join_sum(pool: &ThreadPool, data: &[i64], granularity: usize) -> i64 {
    if data.len() <= granularity {
        return data.iter().sum();
    }
    let mid = data.len() / 2;
    let (left, right) = data.split_at(mid);
    let left_owned = left.to_vec();
    let left_future = pool
        .submit(move || fork_join_sum_leaf(&left_owned, granularity))
        .unwrap();
    let right_sum = fork_join_sum(pool, right, granularity);
    let left_sum = pool.get(left_future);
    left_sum + right_sum
}

fn fork_join_sum_leaf(data: &[i64], granularity: usize) -> i64 {
    if data.len() <= granularity {
        return data.iter().sum();
    }
    let mid = data.len() / 2;
    let (left, right) = data.split_at(mid);
    fork_join_sum_leaf(left, granularity) + fork_join_sum_leaf(right, granularity)
}
