//! A drop-in, zone-based general-purpose allocator.
//!
//! Memory is obtained from the OS in bulk via anonymous mappings ("zones")
//! and subdivided internally into blocks, rather than requested per
//! allocation. Three size classes exist:
//!
//! - `TINY`: pooled zones serving payloads up to [`constants::TINY_LIMIT`] bytes.
//! - `SMALL`: pooled zones serving payloads up to [`constants::SMALL_LIMIT`] bytes.
//! - `LARGE`: one dedicated mapping per allocation, for anything bigger.
//!
//! A single process-wide mutex serializes every allocation, free,
//! reallocation, and introspection call -- there are no per-thread arenas
//! and no lock-free fast paths. See [`engine`] for the core, and
//! [`introspect`] for the live-allocation listing.
//!
//! ```
//! let p = zonealloc::malloc(64).expect("allocation should succeed");
//! zonealloc::free(Some(p));
//! ```
#![warn(missing_docs)]
#![allow(
    clippy::missing_safety_doc,
    clippy::module_name_repetitions,
    clippy::cast_ptr_alignment
)]

pub mod block;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod fmt;
pub mod introspect;
pub mod sys;
pub mod zone;

pub use engine::{calloc, free, malloc, realloc, ZoneAlloc};
pub use error::{AllocError, AllocResult};
pub use introspect::{show_alloc_mem, show_alloc_mem_ex, show_alloc_mem_ex_to, show_alloc_mem_to};

/// Re-exports of everything most callers need, in one `use` statement.
pub mod prelude {
    pub use crate::{
        calloc, free, malloc, realloc, show_alloc_mem, show_alloc_mem_ex, AllocError, AllocResult,
        ZoneAlloc,
    };
}

#[cfg(feature = "logging")]
fn init_logging() {
    use std::sync::OnceLock;
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        tracing::debug!(
            align = constants::ALIGN,
            tiny_limit = constants::TINY_LIMIT,
            small_limit = constants::SMALL_LIMIT,
            "zonealloc engine ready"
        );
    });
}

/// Explicit initialization hook. Calling this is never required for
/// correctness -- the engine and its debug-config resolution are both
/// lazily initialized on first use -- but it gives a caller with the
/// `logging` feature enabled a defined point at which the one-time
/// `tracing::debug!` "engine ready" event fires, instead of it firing
/// implicitly on whichever allocation happens to run first.
pub fn init() {
    #[cfg(feature = "logging")]
    init_logging();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_reexports_compile() {
        let p = prelude::malloc(8).unwrap();
        prelude::free(Some(p));
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
