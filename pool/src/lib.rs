//! Fork/join thread pool: component E. A shared queue of futures, worker
//! threads, and help-if-needed `get` semantics so recursive fork-join use
//! can't deadlock even when every worker is blocked on its own
//! submission (spec.md §4.5, §8 scenario 6).
//!
//! Grounded on spec.md directly; wake/wait shape follows
//! `pilotos_support::sync` and the teacher's `futex.rs` (see DESIGN.md).

pub mod config;
pub mod error;
pub mod future;
pub mod threadpool;

pub use error::{PoolError, PoolResult};
pub use future::FutureStatus;
pub use threadpool::{PoolFuture, ThreadPool};
