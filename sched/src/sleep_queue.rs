//! Per-CPU sleep queue.
//!
//! Grounded on the teacher's `sleep.rs`: a queue ordered by wake time,
//! drained from the front each tick via `wake_due_sleepers`. The teacher
//! uses a fixed-size array scanned linearly (bounded by a small
//! `MAX_SLEEPERS`); this port uses the same ordered-set structure as the
//! ready queue since nothing here needs a fixed upper bound, but keeps the
//! teacher's "ms to ticks" helper and its wake-everything-due-this-tick
//! draining behaviour.

use std::collections::BTreeSet;

use pilotos_support::clock::NSEC_PER_TICK;

use crate::task::{OrderKey, TaskId};

pub fn ms_to_ticks(ms: u64) -> u64 {
    let ns = ms.saturating_mul(1_000_000);
    (ns + NSEC_PER_TICK - 1) / NSEC_PER_TICK
}

pub struct SleepQueue {
    set: BTreeSet<(u64, u64, TaskId)>,
    next_seq: u64,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self {
            set: BTreeSet::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn insert(&mut self, id: TaskId, wake_at_ns: u64) -> OrderKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.set.insert((wake_at_ns, seq, id));
        OrderKey {
            primary: wake_at_ns,
            seq,
        }
    }

    pub fn remove(&mut self, id: TaskId, key: OrderKey) {
        self.set.remove(&(key.primary, key.seq, id));
    }

    /// Pop every sleeper whose wake time is `<= now_ns`, in wake-time
    /// order. The teacher's `wake_due_sleepers` uses the same `<=`
    /// comparator so a sleeper due exactly on this tick wakes on it
    /// rather than the next one.
    pub fn drain_due(&mut self, now_ns: u64) -> Vec<TaskId> {
        let mut due = Vec::new();
        while let Some(&(wake_at, seq, id)) = self.set.iter().next() {
            if wake_at > now_ns {
                break;
            }
            self.set.remove(&(wake_at, seq, id));
            due.push(id);
        }
        due
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_due_wakes_in_wake_time_order_and_leaves_later_ones() {
        let mut q = SleepQueue::new();
        q.insert(TaskId(1), 500);
        q.insert(TaskId(2), 100);
        q.insert(TaskId(3), 1_000_000);
        let due = q.drain_due(500);
        assert_eq!(due, vec![TaskId(2), TaskId(1)]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn exactly_due_wakes_on_this_tick() {
        let mut q = SleepQueue::new();
        q.insert(TaskId(1), 1000);
        assert_eq!(q.drain_due(1000), vec![TaskId(1)]);
    }
}
