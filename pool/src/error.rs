//! Disjoint pool error kind, matching spec.md §7's "error kinds are
//! disjoint" convention and the hand-rolled `Display`/`Error` style used
//! by `sched::error`/`fs::error` rather than a derive-macro error crate.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// `submit` raced with `shutdown`. spec.md §4.5/§7 document this as
    /// implementation-defined: the task may or may not run. Here,
    /// shutdown always wins once observed — a future submitted after the
    /// shutdown flag is set is rejected rather than silently dropped.
    PoolShutdown,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::PoolShutdown => write!(f, "thread pool is shutting down"),
        }
    }
}

impl std::error::Error for PoolError {}

pub type PoolResult<T> = Result<T, PoolError>;
