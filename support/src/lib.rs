//! Ambient kernel-support stack shared by every other crate in this
//! workspace: logging, clocks, lock primitives, the IPI bus, and the
//! scenario-test harness. Grounded on `slopos-lib` from the teacher crate.

pub mod clock;
pub mod ipi;
pub mod klog;
pub mod spinlock;
pub mod sync;
pub mod testing;

pub use klog::KlogLevel;
pub use spinlock::{RwSpinLock, SpinLock};
pub use sync::{CondVar, Mutex, Semaphore, SyncError};
