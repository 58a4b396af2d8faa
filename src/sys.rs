//! The allocator's only OS surface: page size, anonymous mapping, unmapping.
//!
//! The core consumes exactly two capabilities from the environment -- a
//! page-size query and an anonymous/private mapping primitive with its
//! matching unmap. Grounded on
//! `crates/system/src/memory.rs`'s `management::{allocate, free}` shape
//! (Preconditions/Postconditions-style safety docs around a thin OS wrapper),
//! but calling `libc::mmap`/`libc::munmap` directly rather than going through
//! the `region` crate: this crate already depends on `libc` for its `std`
//! feature, so this stays on that existing dependency rather than layering
//! a second mmap abstraction on top of it.

use std::ptr;

/// Query the system page size.
///
/// # Panics
///
/// Panics if `sysconf(_SC_PAGESIZE)` returns a non-positive value, which
/// would indicate a broken libc -- not a condition this allocator can
/// usefully recover from.
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: `sysconf` with a valid name constant has no preconditions
    // beyond linking against libc, which this crate always does.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    assert!(size > 0, "sysconf(_SC_PAGESIZE) returned {size}");
    size as usize
}

/// Round `bytes` up to the next multiple of the system page size.
#[must_use]
pub fn round_to_page(bytes: usize, page_size: usize) -> usize {
    debug_assert!(page_size > 0 && page_size.is_power_of_two());
    (bytes + page_size - 1) & !(page_size - 1)
}

/// Request a fresh anonymous, private, read-write mapping of exactly `size`
/// bytes (already page-rounded by the caller).
///
/// Returns `None` if the OS declines the mapping.
///
/// # Safety
///
/// `size` must be non-zero. The returned pointer is valid for reads and
/// writes over `[ptr, ptr + size)` until it is passed back to
/// [`unmap_zone`] with the same `size`.
#[must_use]
pub unsafe fn map_zone(size: usize) -> Option<ptr::NonNull<u8>> {
    debug_assert!(size > 0);
    // SAFETY: `MAP_ANON | MAP_PRIVATE` with a null address lets the kernel
    // pick the mapping location; fd/offset are ignored for an anonymous
    // mapping. The caller upholds the `size` precondition documented above.
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return None;
    }
    // SAFETY: mmap succeeded, so `raw` is non-null and valid for `size` bytes.
    Some(unsafe { ptr::NonNull::new_unchecked(raw.cast::<u8>()) })
}

/// Release a mapping previously returned by [`map_zone`].
///
/// # Safety
///
/// `ptr` must be a base address previously returned by [`map_zone`], `size`
/// must exactly match the size passed to that call, and `ptr` must not be
/// used again afterward (including by any other live reference into the
/// mapping -- all such references are logically invalidated here even
/// though Rust cannot enforce that across an FFI boundary).
pub unsafe fn unmap_zone(ptr: ptr::NonNull<u8>, size: usize) {
    // SAFETY: caller upholds the preconditions above; `munmap` failing here
    // would mean we passed a bad (ptr, size) pair, which is a bug in this
    // crate, not a recoverable runtime condition.
    let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
    debug_assert_eq!(rc, 0, "munmap failed for a zone this allocator owns");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane() {
        let ps = page_size();
        assert!(ps >= 4096);
        assert!(ps.is_power_of_two());
    }

    #[test]
    fn round_to_page_rounds_up() {
        let ps = 4096;
        assert_eq!(round_to_page(1, ps), ps);
        assert_eq!(round_to_page(ps, ps), ps);
        assert_eq!(round_to_page(ps + 1, ps), 2 * ps);
    }

    #[test]
    fn map_and_unmap_round_trip() {
        let ps = page_size();
        // SAFETY: test-local use obeying map_zone/unmap_zone's contracts.
        unsafe {
            let mapping = map_zone(ps).expect("mmap should succeed for one page");
            // Touch every byte to prove the mapping is actually usable.
            ptr::write_bytes(mapping.as_ptr(), 0xAB, ps);
            assert_eq!(*mapping.as_ptr(), 0xAB);
            unmap_zone(mapping, ps);
        }
    }
}
