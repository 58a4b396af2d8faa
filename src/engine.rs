//! The locked core: global zone list, lock-free-internal routines, and the
//! public allocation entry points.
//!
//! Every public function here follows the same shape: acquire the global
//! mutex, call a `_core` routine that assumes the lock is already held, drop
//! the guard, return. The `_core` routines never reacquire the mutex --
//! `realloc_core` calls `alloc_core`/`free_core` directly rather than going
//! back through `malloc`/`free`, which is what makes reallocation safe
//! without a reentrant lock.
//!
//! Grounded on `arena/thread_safe.rs`'s choice of `parking_lot::Mutex` over
//! `std::sync::Mutex` (no poisoning: a panic under the lock must not wedge
//! every future call in the process) and on `allocator/sealed.rs`'s split
//! between a sealed internal surface and safe public entry points.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;

use parking_lot::{Mutex, MutexGuard};

use crate::block::{self, BlockHeader};
use crate::config;
use crate::constants::{align_up, ALIGN};
use crate::error::{AllocError, AllocResult};
use crate::fmt::{self, FixedBuf};
use crate::sys;
use crate::zone::{self, ZoneClass, ZoneHeader};

/// Head of the global, address-ordered zone list. Everything reachable from
/// it is live exactly while `ENGINE`'s lock is held by the current thread,
/// which is the invariant every `unsafe fn` below leans on.
struct EngineState {
    zones: Option<NonNull<ZoneHeader>>,
}

// SAFETY: `EngineState` is only ever touched through `ENGINE`'s mutex, which
// serializes every access; it is never read or written without the lock
// held, so sending the raw pointers it contains across threads is sound.
unsafe impl Send for EngineState {}

static ENGINE: Mutex<EngineState> = Mutex::new(EngineState { zones: None });

fn engine_lock() -> MutexGuard<'static, EngineState> {
    ENGINE.lock()
}

fn trace(event: &str, build: impl FnOnce(&mut FixedBuf)) {
    if !config::get().debug {
        return;
    }
    let mut buf = FixedBuf::new();
    buf.push_str(event);
    build(&mut buf);
    fmt::emit_stderr_line(&buf);
}

/// Find the first free block of at least `need` bytes among zones of `class`
/// in list order, first-fit.
///
/// # Safety
///
/// Every zone reachable from `zones` must be live.
unsafe fn find_free_in_zones(
    zones: Option<NonNull<ZoneHeader>>,
    class: ZoneClass,
    need: usize,
) -> Option<NonNull<BlockHeader>> {
    let mut cursor = zones;
    while let Some(zone) = cursor {
        // SAFETY: caller guarantees every reachable zone is live.
        let zref = unsafe { zone.as_ref() };
        if zref.class == class {
            // SAFETY: `zref.blocks` chains through this zone's live blocks.
            if let Some(block) = unsafe { block::find_free(zref.blocks, need) } {
                return Some(block);
            }
        }
        cursor = zref.next;
    }
    None
}

/// Find the zone owning `ptr`, i.e. the zone whose mapping contains it.
///
/// # Safety
///
/// Every zone reachable from `zones` must be live.
unsafe fn owning_zone(
    zones: Option<NonNull<ZoneHeader>>,
    ptr: NonNull<u8>,
) -> Option<NonNull<ZoneHeader>> {
    let addr = ptr.as_ptr() as usize;
    let mut cursor = zones;
    while let Some(zone) = cursor {
        // SAFETY: caller guarantees every reachable zone is live.
        let zref = unsafe { zone.as_ref() };
        let base = zone.as_ptr() as usize;
        if addr >= base && addr < base + zref.size {
            return Some(zone);
        }
        cursor = zref.next;
    }
    None
}

/// Find the block within a zone's block list whose payload address equals
/// `ptr` exactly, along with its predecessor (`None` if it's the head).
///
/// # Safety
///
/// Every block reachable from `head` must be live.
unsafe fn owning_block(
    head: Option<NonNull<BlockHeader>>,
    ptr: NonNull<u8>,
) -> Option<(Option<NonNull<BlockHeader>>, NonNull<BlockHeader>)> {
    let mut prev = None;
    let mut cursor = head;
    while let Some(block) = cursor {
        // SAFETY: caller guarantees every reachable block is live.
        let payload = unsafe { BlockHeader::payload(block) };
        if payload == ptr {
            return Some((prev, block));
        }
        prev = Some(block);
        cursor = unsafe { block.as_ref().next };
    }
    None
}

/// Allocate `size` bytes. Assumes `ENGINE`'s lock is already held by the
/// caller.
///
/// # Safety
///
/// The caller holds `ENGINE`'s lock for the duration of this call.
unsafe fn alloc_core(state: &mut EngineState, size: usize) -> AllocResult<NonNull<u8>> {
    let requested = size.max(1);
    if requested > usize::MAX - (ALIGN - 1) {
        trace("malloc failed: ", |b| {
            b.push_str("size=");
            b.push_udec(size);
            b.push_str(" reason=overflow");
        });
        return Err(AllocError::SizeOverflow);
    }
    let aligned = align_up(requested);
    let class = block::classify(aligned);

    let mut block = match class {
        ZoneClass::Large => {
            trace("zone new large zone: ", |b| {
                b.push_str("size=");
                b.push_udec(aligned);
            });
            // SAFETY: caller holds the lock; no other thread can observe
            // `state.zones` while we splice this new zone in.
            let zone = unsafe { zone::create_zone(ZoneClass::Large, aligned, sys::page_size()) }
                .ok_or_else(|| {
                    trace("zone failed: mmap", |_| {});
                    AllocError::out_of_memory(requested)
                })?;
            // SAFETY: `zone` and `state.zones` are both live under the lock.
            state.zones = unsafe { zone::insert_sorted(state.zones, zone) };
            // SAFETY: a freshly created zone always has exactly one block.
            unsafe { zone.as_ref() }
                .blocks
                .expect("freshly created zone has one block")
        }
        _ => {
            // SAFETY: every zone reachable from `state.zones` is live.
            if let Some(block) = unsafe { find_free_in_zones(state.zones, class, aligned) } {
                block
            } else {
                trace("zone new pooled zone: ", |b| {
                    b.push_str("class=");
                    b.push_str(class.label());
                });
                // SAFETY: caller holds the lock.
                let zone = unsafe { zone::create_zone(class, 0, sys::page_size()) }.ok_or_else(
                    || {
                        trace("zone failed: mmap", |_| {});
                        AllocError::out_of_memory(requested)
                    },
                )?;
                // SAFETY: `zone`/`state.zones` are both live under the lock.
                state.zones = unsafe { zone::insert_sorted(state.zones, zone) };
                // SAFETY: a freshly created zone always has exactly one block.
                unsafe { zone.as_ref() }
                    .blocks
                    .expect("freshly created zone has one block")
            }
        }
    };

    if class != ZoneClass::Large {
        // SAFETY: `block` is live and free, with `size >= aligned` by
        // construction of the two branches above.
        unsafe { block::split(block, aligned) };
        // SAFETY: `block` is live.
        unsafe { block.as_mut().free = false };
    }

    // SAFETY: `block` is live, and owns its payload exclusively now that it
    // is marked used.
    let payload = unsafe { BlockHeader::payload(block) };
    if config::get().scribble {
        // SAFETY: `payload` is valid for `requested` writable bytes -- the
        // block's aligned size is always >= `requested`.
        unsafe { payload.as_ptr().write_bytes(0xAA, requested) };
    }

    trace(
        if class == ZoneClass::Large {
            "malloc large: "
        } else {
            "malloc ok: "
        },
        |b| {
            b.push_str("size=");
            b.push_udec(requested);
            b.push_str(" ptr=");
            b.push_ptr(payload.as_ptr());
        },
    );

    Ok(payload)
}

/// Free `ptr`, or do nothing if it is `None` or not a live allocation this
/// engine owns. Assumes `ENGINE`'s lock is already held by the caller.
///
/// # Safety
///
/// The caller holds `ENGINE`'s lock for the duration of this call.
unsafe fn free_core(state: &mut EngineState, ptr: Option<NonNull<u8>>) {
    let Some(ptr) = ptr else {
        return;
    };

    // SAFETY: every zone reachable from `state.zones` is live.
    let Some(zone) = (unsafe { owning_zone(state.zones, ptr) }) else {
        trace("free ignored: ", |b| b.push_str("unowned"));
        return;
    };
    // SAFETY: `zone` is live.
    let zref = unsafe { zone.as_ref() };

    if zref.class == ZoneClass::Large {
        // SAFETY: a LARGE zone always has exactly one block.
        let block = zref.blocks.expect("large zone always has one block");
        // SAFETY: `block` is live.
        let payload = unsafe { BlockHeader::payload(block) };
        if payload != ptr {
            // Interior pointer into a LARGE zone: not a block boundary.
            trace("free ignored: ", |b| b.push_str("interior"));
            return;
        }
        if config::get().scribble {
            // SAFETY: `block`'s size bytes at `payload` are live and owned.
            let size = unsafe { block.as_ref().size };
            unsafe { payload.as_ptr().write_bytes(0x55, size) };
        }
        // SAFETY: `zone`/`state.zones` are both live under the lock.
        state.zones = unsafe { zone::remove(state.zones, zone) };
        // SAFETY: `zone` was just unlinked and nothing else references it.
        unsafe { zone::destroy_zone(zone) };
        trace("free zone: ", |b| b.push_ptr(ptr.as_ptr()));
        return;
    }

    // SAFETY: every block reachable from `zref.blocks` is live.
    let Some((prev, mut block)) = (unsafe { owning_block(zref.blocks, ptr) }) else {
        trace("free ignored: ", |b| b.push_str("interior"));
        return;
    };

    // SAFETY: `block` is live.
    if unsafe { block.as_ref().free } {
        trace("free ignored: ", |b| b.push_str("double-free"));
        return;
    }

    if config::get().scribble {
        // SAFETY: `block`'s size bytes at `ptr` are live and owned.
        let size = unsafe { block.as_ref().size };
        unsafe { ptr.as_ptr().write_bytes(0x55, size) };
    }

    // SAFETY: `block` is live.
    unsafe { block.as_mut().free = true };
    // SAFETY: `block` is live; its `next` (if any) is adjacent and live.
    unsafe { block::coalesce_right(block) };
    if let Some(mut prev) = prev {
        // SAFETY: `prev` is live.
        if unsafe { prev.as_ref().free } {
            // SAFETY: `prev`'s `next` is `block`, adjacent and live.
            unsafe { block::coalesce_right(prev) };
        }
    }

    trace("free ok: ", |b| b.push_ptr(ptr.as_ptr()));
}

/// Reallocate `ptr` to `size` bytes, following the in-place-grow-or-move
/// policy in full. Assumes `ENGINE`'s lock is already held by the caller.
///
/// # Safety
///
/// The caller holds `ENGINE`'s lock for the duration of this call.
unsafe fn realloc_core(
    state: &mut EngineState,
    ptr: Option<NonNull<u8>>,
    size: usize,
) -> Option<NonNull<u8>> {
    let Some(ptr) = ptr else {
        trace("realloc acts as malloc", |_| {});
        // SAFETY: caller holds the lock.
        return unsafe { alloc_core(state, size) }.ok();
    };
    if size == 0 {
        trace("realloc acts as free", |_| {});
        // SAFETY: caller holds the lock.
        unsafe { free_core(state, Some(ptr)) };
        return None;
    }
    if size > usize::MAX - (ALIGN - 1) {
        trace("realloc failed: ", |b| {
            b.push_str("size=");
            b.push_udec(size);
            b.push_str(" reason=overflow");
        });
        return None;
    }
    let aligned = align_up(size);

    // SAFETY: every zone reachable from `state.zones` is live.
    let Some(zone) = (unsafe { owning_zone(state.zones, ptr) }) else {
        return None;
    };
    // SAFETY: `zone` is live.
    let zref = unsafe { zone.as_ref() };
    let class = zref.class;
    let zone_blocks = zref.blocks;

    // SAFETY: every block reachable from `zone_blocks` is live.
    let Some((_prev, mut block)) = (unsafe { owning_block(zone_blocks, ptr) }) else {
        return None;
    };
    // SAFETY: `block` is live.
    if unsafe { block.as_ref().free } {
        return None;
    }

    // SAFETY: `block` is live.
    let old_size = unsafe { block.as_ref().size };

    if aligned <= old_size {
        trace("realloc in-place shrink: ", |b| {
            b.push_str("ptr=");
            b.push_ptr(ptr.as_ptr());
        });
        return Some(ptr);
    }

    if class != ZoneClass::Large {
        // SAFETY: `block` is live; `next` (if any) is adjacent and live.
        let can_grow_in_place = unsafe {
            block.as_ref().next.is_some_and(|next| {
                let next_ref = next.as_ref();
                next_ref.free && old_size + crate::constants::BLOCK_HDR + next_ref.size >= aligned
            })
        };
        if can_grow_in_place {
            // SAFETY: `block`'s `next` is free and adjacent.
            unsafe { block::coalesce_right(block) };
            // SAFETY: `block` is live, free region >= `aligned` by the
            // `can_grow_in_place` check above.
            unsafe { block::split(block, aligned) };
            if config::get().scribble {
                // SAFETY: `ptr`'s block now spans at least `aligned` bytes;
                // `[old_size, aligned)` is the newly absorbed tail.
                unsafe {
                    ptr.as_ptr()
                        .add(old_size)
                        .write_bytes(0xAA, aligned - old_size)
                };
            }
            trace("realloc in-place growth: ", |b| {
                b.push_str("ptr=");
                b.push_ptr(ptr.as_ptr());
            });
            return Some(ptr);
        }
    }

    // Move path: allocate fresh, copy the old payload, free the old block.
    // SAFETY: caller holds the lock.
    let new_ptr = unsafe { alloc_core(state, aligned) }.ok()?;
    // SAFETY: `ptr` has `old_size` live bytes; `new_ptr` has at least
    // `aligned >= old_size` freshly allocated bytes, and the two regions
    // come from distinct mappings so they cannot overlap.
    unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size) };
    // SAFETY: caller holds the lock; `ptr` is still a live allocation here.
    unsafe { free_core(state, Some(ptr)) };
    trace("realloc moved: ", |b| {
        b.push_str("from=");
        b.push_ptr(ptr.as_ptr());
        b.push_str(" to=");
        b.push_ptr(new_ptr.as_ptr());
    });
    Some(new_ptr)
}

/// Allocate `size` bytes from this engine's pools, or `None` on failure.
///
/// `size == 0` yields a minimum-size, freeable real allocation rather than
/// `None` (see DESIGN.md, Open Question 1).
#[must_use]
pub fn malloc(size: usize) -> Option<NonNull<u8>> {
    let mut state = engine_lock();
    // SAFETY: `state` is the locked guard.
    unsafe { alloc_core(&mut state, size) }.ok()
}

/// Free `ptr`. A `None` pointer, an unowned pointer, an interior pointer,
/// or a double-free are all silently ignored.
pub fn free(ptr: Option<NonNull<u8>>) {
    let mut state = engine_lock();
    // SAFETY: `state` is the locked guard.
    unsafe { free_core(&mut state, ptr) };
}

/// Reallocate `ptr` to `size` bytes. A `None` `ptr` acts as `malloc`; a
/// `size` of zero acts as `free` and returns `None`; growing or shrinking
/// in place is attempted before falling back to an allocate-copy-free move.
#[must_use]
pub fn realloc(ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
    let mut state = engine_lock();
    // SAFETY: `state` is the locked guard.
    unsafe { realloc_core(&mut state, ptr, size) }
}

/// Allocate `count * size` bytes, zero-filled. `count * size` overflowing
/// `usize` fails with `None` rather than wrapping.
#[must_use]
pub fn calloc(count: usize, size: usize) -> Option<NonNull<u8>> {
    if count != 0 && size > usize::MAX / count {
        trace("calloc failed: ", |b| {
            b.push_str("count=");
            b.push_udec(count);
            b.push_str(" size=");
            b.push_udec(size);
        });
        return None;
    }
    let total = count * size;
    let ptr = malloc(total)?;
    // SAFETY: `malloc` returned a live allocation of at least `total` bytes.
    unsafe { ptr.as_ptr().write_bytes(0, total) };
    trace("calloc ok: ", |b| {
        b.push_str("total=");
        b.push_udec(total);
        b.push_str(" ptr=");
        b.push_ptr(ptr.as_ptr());
    });
    Some(ptr)
}

/// One line's worth of data from [`for_each_zone_entry`]'s traversal.
pub(crate) enum ZoneEntry {
    /// A zone header, emitted once per zone before its blocks.
    Zone { label: &'static str, base: usize },
    /// A single live block's payload pointer and size.
    Block { payload: NonNull<u8>, size: usize },
}

/// Walk every zone (in global-list, ascending-address order) and, within
/// each, every live block (in block-list order), under the engine's lock,
/// feeding each header/block to `visit` in order. Used by
/// [`crate::introspect`] so the compact listing and the hexdump view share
/// one traversal.
///
/// Zones with no live blocks still produce a `ZoneEntry::Zone`: every zone
/// always gets a header line, even an empty one.
pub(crate) fn for_each_zone_entry(mut visit: impl FnMut(ZoneEntry)) {
    let state = engine_lock();
    let mut zone_cursor = state.zones;
    while let Some(zone) = zone_cursor {
        // SAFETY: every zone reachable from `state.zones` is live for the
        // duration of this traversal, which holds the lock throughout.
        let zref = unsafe { zone.as_ref() };
        visit(ZoneEntry::Zone {
            label: zref.class.label(),
            base: zone.as_ptr() as usize,
        });
        let mut block_cursor = zref.blocks;
        while let Some(block) = block_cursor {
            // SAFETY: every block reachable from `zref.blocks` is live.
            let bref = unsafe { block.as_ref() };
            if !bref.free {
                // SAFETY: `block` is live and used.
                let payload = unsafe { BlockHeader::payload(block) };
                visit(ZoneEntry::Block {
                    payload,
                    size: bref.size,
                });
            }
            block_cursor = bref.next;
        }
        zone_cursor = zref.next;
    }
}

/// `unsafe impl GlobalAlloc` wrapper handing this crate's pools to
/// `#[global_allocator]`.
///
/// This allocator only ever produces 16-byte-aligned payloads (see
/// `constants::ALIGN`); requesting a `Layout` with a larger alignment is a
/// contract violation this type cannot honor and debug-asserts against
/// rather than silently returning misaligned memory.
pub struct ZoneAlloc;

// SAFETY: `malloc`/`free`/`realloc`/`calloc` never unwind, are safe to call
// concurrently (they serialize through `ENGINE`'s mutex), and hand back
// memory that stays valid until explicitly freed, satisfying `GlobalAlloc`'s
// contract for every `Layout` with `align() <= ALIGN`.
unsafe impl GlobalAlloc for ZoneAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        debug_assert!(
            layout.align() <= ALIGN,
            "ZoneAlloc only guarantees {ALIGN}-byte alignment"
        );
        malloc(layout.size()).map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        debug_assert!(
            layout.align() <= ALIGN,
            "ZoneAlloc only guarantees {ALIGN}-byte alignment"
        );
        calloc(1, layout.size()).map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        free(NonNull::new(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        debug_assert!(
            layout.align() <= ALIGN,
            "ZoneAlloc only guarantees {ALIGN}-byte alignment"
        );
        realloc(NonNull::new(ptr), new_size).map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }
}

/// `#[no_mangle]` C ABI wrappers for interposing the host process's libc
/// allocator. Provided and unit-tested as plain Rust functions; wiring an
/// actual `LD_PRELOAD` shared object is left to the consuming build.
#[cfg(feature = "capi")]
mod capi {
    use std::ffi::c_void;
    use std::ptr::NonNull;

    /// # Safety
    ///
    /// Same contract as libc `malloc`.
    #[no_mangle]
    pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
        super::malloc(size).map_or(std::ptr::null_mut(), |p| p.as_ptr().cast())
    }

    /// # Safety
    ///
    /// `ptr` must be `NULL` or a pointer previously returned by this
    /// module's `malloc`/`calloc`/`realloc`, not already freed.
    #[no_mangle]
    pub unsafe extern "C" fn free(ptr: *mut c_void) {
        super::free(NonNull::new(ptr.cast()));
    }

    /// # Safety
    ///
    /// Same contract as libc `realloc`.
    #[no_mangle]
    pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        super::realloc(NonNull::new(ptr.cast()), size).map_or(std::ptr::null_mut(), |p| {
            p.as_ptr().cast()
        })
    }

    /// # Safety
    ///
    /// Same contract as libc `calloc`.
    #[no_mangle]
    pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
        super::calloc(count, size).map_or(std::ptr::null_mut(), |p| p.as_ptr().cast())
    }
}

/// `ENGINE` is a genuine process-wide singleton by design (one mutex, no
/// per-thread arenas) -- which means every unit test in this
/// binary shares it. Tests that only check a single allocation's own
/// properties (alignment, prefix preservation, ...) are unaffected by
/// concurrent activity from other tests. Tests that inspect *global* state
/// (`show_alloc_mem`'s `Total` line, its idempotency across calls) need
/// exclusivity for their duration; they take this lock first.
#[cfg(test)]
pub(crate) fn test_lock() -> MutexGuard<'static, ()> {
    static TEST_LOCK: Mutex<()> = Mutex::new(());
    TEST_LOCK.lock()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_returns_aligned_pointer() {
        let p = malloc(42).expect("allocation should succeed");
        assert_eq!(p.as_ptr() as usize % ALIGN, 0);
        free(Some(p));
    }

    #[test]
    fn malloc_zero_yields_a_real_allocation() {
        let p = malloc(0).expect("size 0 should still allocate");
        free(Some(p));
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        free(None);
    }

    #[test]
    fn double_free_does_not_crash() {
        let p = malloc(32).unwrap();
        free(Some(p));
        free(Some(p));
    }

    #[test]
    fn realloc_preserves_prefix() {
        let p = malloc(64).unwrap();
        // SAFETY: `p` is a live, exclusively-owned 64-byte allocation.
        unsafe {
            for i in 0..64u8 {
                *p.as_ptr().add(i as usize) = i;
            }
        }
        let q = realloc(Some(p), 512).expect("grow should succeed");
        // SAFETY: `q` is live with at least 512 bytes, the first 64 of
        // which must equal the old payload.
        unsafe {
            for i in 0..64u8 {
                assert_eq!(*q.as_ptr().add(i as usize), i);
            }
        }
        free(Some(q));
    }

    #[test]
    fn realloc_null_acts_as_malloc() {
        let p = realloc(None, 16).expect("should allocate");
        free(Some(p));
    }

    #[test]
    fn realloc_zero_acts_as_free() {
        let p = malloc(16).unwrap();
        assert!(realloc(Some(p), 0).is_none());
    }

    #[test]
    fn large_allocations_use_disjoint_mappings() {
        let p = malloc(9216).unwrap();
        let q = malloc(9216).unwrap();
        let p_addr = p.as_ptr() as usize;
        let q_addr = q.as_ptr() as usize;
        assert!(p_addr + 9216 <= q_addr || q_addr + 9216 <= p_addr);
        free(Some(p));
        free(Some(q));
    }

    #[test]
    fn calloc_zero_fills() {
        let p = calloc(8, 16).expect("calloc should succeed");
        // SAFETY: `p` is live with 128 zero-filled bytes.
        unsafe {
            for i in 0..128 {
                assert_eq!(*p.as_ptr().add(i), 0);
            }
        }
        free(Some(p));
    }

    #[test]
    fn calloc_overflow_fails() {
        assert!(calloc(usize::MAX, 2).is_none());
    }
}
