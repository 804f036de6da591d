//! Inter-processor interrupt bus.
//!
//! Real APIC/IOAPIC register programming is an external collaborator here
//! (spec.md §1) — this project only owns the four IPI *classes* and the
//! guarantee that a handler runs synchronously, with "interrupts disabled"
//! and "must not sleep" as documented preconditions rather than enforced
//! ones (there is no interrupt context to disable in a host simulation).
//!
//! The seam is the same one `slopos-lib::percpu` uses for
//! `register_send_ipi_to_cpu_fn`/`send_ipi_to_cpu`: hardware delivery is a
//! registered function, so the scheduler core never depends on a concrete
//! driver. Here a target CPU registers a handler closure and a sender
//! delivers by calling it directly — the in-memory equivalent of raising
//! the interrupt and running the handler to completion before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiClass {
    /// Target CPU should yield at the next interrupt return.
    Reschedule,
    /// Target CPU should flush its TLB and decrement the shared
    /// acknowledgement counter carried in the payload.
    TlbShootdown,
    /// Target CPU should print its backtrace.
    Debug,
    /// Target CPU should disable interrupts and halt (except CPU 0, which
    /// must remain responsive to the console per spec.md §4.3).
    Shutdown,
}

pub type IpiHandler = Arc<dyn Fn(IpiClass) + Send + Sync>;

struct Slot {
    handler: Option<IpiHandler>,
    /// Sequentially-consistent delivery flag: a sender must see the
    /// previous IPI to this target acknowledged before sending the next
    /// one (spec.md §4.3's IPI contract).
    delivered: AtomicBool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            handler: None,
            delivered: AtomicBool::new(true),
        }
    }
}

pub struct IpiBus {
    slots: Mutex<Vec<Slot>>,
}

impl IpiBus {
    pub fn new(cpu_count: usize) -> Self {
        let mut slots = Vec::with_capacity(cpu_count);
        for _ in 0..cpu_count {
            slots.push(Slot::empty());
        }
        Self {
            slots: Mutex::new(slots),
        }
    }

    pub fn register_handler(&self, cpu_id: usize, handler: IpiHandler) {
        let mut slots = self.slots.lock().unwrap();
        if cpu_id < slots.len() {
            slots[cpu_id].handler = Some(handler);
        }
    }

    /// Deliver `class` to `target_cpu`. Waits for the previous IPI to that
    /// target to be acknowledged first (spec.md §4.3), then runs the
    /// handler synchronously and marks delivery complete.
    pub fn send(&self, target_cpu: usize, class: IpiClass) {
        let handler = {
            let slots = self.slots.lock().unwrap();
            let Some(slot) = slots.get(target_cpu) else {
                return;
            };
            while !slot.delivered.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            slot.delivered.store(false, Ordering::SeqCst);
            slot.handler.clone()
        };
        if let Some(handler) = handler {
            handler(class);
        }
        if let Some(slot) = self.slots.lock().unwrap().get(target_cpu) {
            slot.delivered.store(true, Ordering::SeqCst);
        }
    }

    pub fn broadcast_excluding(&self, sender_cpu: usize, class: IpiClass) {
        let count = self.slots.lock().unwrap().len();
        for cpu in 0..count {
            if cpu != sender_cpu {
                self.send(cpu, class);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn reschedule_ipi_invokes_target_handler() {
        let bus = IpiBus::new(2);
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.register_handler(
            1,
            Arc::new(move |class| {
                assert_eq!(class, IpiClass::Reschedule);
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.send(1, IpiClass::Reschedule);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
