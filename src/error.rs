//! Standalone error type for zonealloc.
//!
//! Narrowed, `thiserror`-derived sibling of `nebula_memory::error::MemoryError`:
//! this allocator only ever fails in two shapes (the OS wouldn't give us a
//! mapping, or the request's arithmetic would overflow before we ever reach
//! the OS), so the enum stays small rather than carrying the full category
//! taxonomy a general-purpose memory crate needs.

use thiserror::Error;

/// Failure modes for the allocation entry points.
///
/// Never produced by `free`/`show_alloc_mem*` — those never fail by design:
/// inspection functions always succeed, and `free` silently ignores invalid
/// input.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The OS declined to hand back a mapping of the requested size.
    #[error("allocation of {size} bytes failed: out of memory")]
    OutOfMemory {
        /// Requested payload size, in bytes, before header/alignment overhead.
        size: usize,
    },

    /// The requested size (or `count * size` for `calloc`) would overflow
    /// `usize` arithmetic before a mapping is ever attempted.
    #[error("requested size overflows the allocator's internal arithmetic")]
    SizeOverflow,
}

impl AllocError {
    /// Build an [`AllocError::OutOfMemory`] for `size` bytes.
    #[must_use]
    pub fn out_of_memory(size: usize) -> Self {
        Self::OutOfMemory { size }
    }
}

/// Result alias used throughout the engine's internal, lock-held core.
pub type AllocResult<T> = Result<T, AllocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_non_empty() {
        assert!(!AllocError::out_of_memory(4096).to_string().is_empty());
        assert!(!AllocError::SizeOverflow.to_string().is_empty());
    }

    #[test]
    fn out_of_memory_carries_size() {
        let err = AllocError::out_of_memory(4096);
        assert!(err.to_string().contains("4096"));
    }
}
