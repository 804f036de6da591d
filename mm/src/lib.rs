//! Segregated-list heap allocator, the ambient memory-management piece
//! the specification's data model leans on (page-backed buffers for the
//! buffer cache, task stacks) without itself being one of the named
//! components.

pub mod heap;

pub use heap::{BlockHandle, HeapError, HeapStats, SegregatedHeap};
