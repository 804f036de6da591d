use std::fmt;

use crate::blockdev::BlockDeviceError;

/// Error kinds kept disjoint per spec.md §7: a cache-level failure never
/// carries inode semantics and vice versa, so callers match on exactly
/// the failure modes that can occur at their layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    Device(BlockDeviceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeError {
    Cache(CacheError),
    /// Free-sector allocator exhausted during a write-extend.
    OutOfSpace,
    /// `open` on a sector that carries no valid inode.
    NotFound,
    /// `sector == 0xFFFFFFFF`, the reserved "uninitialised" sentinel.
    StaleSector,
}

impl From<CacheError> for InodeError {
    fn from(e: CacheError) -> Self {
        InodeError::Cache(e)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Device(e) => write!(f, "device error: {e:?}"),
        }
    }
}

impl fmt::Display for InodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InodeError::Cache(e) => write!(f, "{e}"),
            InodeError::OutOfSpace => write!(f, "free-sector allocator exhausted"),
            InodeError::NotFound => write!(f, "inode not present"),
            InodeError::StaleSector => write!(f, "accessed reserved uninitialised sector 0xFFFFFFFF"),
        }
    }
}

impl std::error::Error for CacheError {}
impl std::error::Error for InodeError {}
