//! Block headers and the first-fit, split/coalesce block manager.
//!
//! A block is a contiguous run of bytes inside a zone's mapping: a
//! [`BlockHeader`] immediately followed by `size` bytes of payload. Blocks
//! form a singly linked, address-ordered list rooted at their owning zone's
//! `ZoneHeader::blocks`. Everything here assumes the engine's global mutex is
//! already held -- these are lock-free-internal primitives, so that
//! `realloc` can call `free_core`/`alloc_core` directly without re-entering
//! the lock.
//!
//! Grounded on the raw-pointer, intrusively-linked bump structures in
//! `arena/thread_safe.rs` (`ThreadSafeChunk`'s `next`-pointer chaining and its
//! block-level `// SAFETY:` comment density), narrowed down to the
//! single-threaded-under-lock case this allocator actually needs.

use std::ptr::NonNull;

use crate::constants::{align_up, BLOCK_HDR};
use crate::zone::ZoneClass;

/// Header stored in-band at the start of every block.
///
/// `repr(C)` because this struct's layout is load-bearing: it is read back
/// out of raw mmap'd bytes, not just held behind a Rust reference.
#[repr(C)]
pub struct BlockHeader {
    /// Next block in this zone's address-ordered list, or `None` at the tail.
    pub next: Option<NonNull<BlockHeader>>,
    /// Payload capacity in bytes, not including this header.
    pub size: usize,
    /// Whether this block is currently unallocated.
    pub free: bool,
}

impl BlockHeader {
    /// Pointer to this block's payload, immediately after its header.
    ///
    /// # Safety
    ///
    /// `block` must point at a live, correctly initialized `BlockHeader`
    /// inside a mapped zone.
    #[must_use]
    pub unsafe fn payload(block: NonNull<BlockHeader>) -> NonNull<u8> {
        // SAFETY: `BLOCK_HDR` is the aligned header size; offsetting by it
        // from a valid header pointer lands inside the same allocation,
        // which the caller guarantees is the block's mapped backing memory.
        unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(BLOCK_HDR)) }
    }

    /// Recover the owning block header from a payload pointer previously
    /// returned by [`BlockHeader::payload`].
    ///
    /// # Safety
    ///
    /// `payload` must have been produced by [`BlockHeader::payload`] applied
    /// to a still-live block in the same zone; calling this on an arbitrary
    /// pointer address is undefined behavior.
    #[must_use]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
        // SAFETY: inverse of `payload` above, with the same caller contract.
        unsafe { NonNull::new_unchecked(payload.as_ptr().sub(BLOCK_HDR).cast::<BlockHeader>()) }
    }
}

/// Classify an already size-aligned payload request by the zone class that
/// should host it.
#[must_use]
pub fn classify(aligned_size: usize) -> ZoneClass {
    use crate::constants::{SMALL_LIMIT, TINY_LIMIT};
    if aligned_size <= TINY_LIMIT {
        ZoneClass::Tiny
    } else if aligned_size <= SMALL_LIMIT {
        ZoneClass::Small
    } else {
        ZoneClass::Large
    }
}

/// Total bytes a block of `payload` size consumes within a zone, header
/// included, aligned to the allocator's quantum.
#[must_use]
pub fn block_span(payload: usize) -> usize {
    BLOCK_HDR + align_up(payload)
}

/// If `block` has enough spare payload to carve off a new free block of at
/// least `BLOCK_HDR + ALIGN` bytes after satisfying `need`, split it in
/// place and return the new trailing block. Otherwise leaves `block`
/// untouched and returns `None`.
///
/// # Safety
///
/// `block` must point at a live, free block with `size >= need`.
pub unsafe fn split(mut block: NonNull<BlockHeader>, need: usize) -> Option<NonNull<BlockHeader>> {
    let need = align_up(need);
    // SAFETY: caller guarantees `block` is live.
    let header = unsafe { block.as_mut() };
    debug_assert!(header.size >= need);
    let remainder = header.size - need;
    if remainder < BLOCK_HDR + crate::constants::ALIGN {
        return None;
    }

    // SAFETY: `block`'s payload spans `header.size` live bytes; carving a
    // new header at offset `need` into that payload stays within the same
    // mapped zone because `remainder >= BLOCK_HDR + ALIGN` was just checked.
    let new_block_ptr = unsafe {
        BlockHeader::payload(block).as_ptr().add(need).cast::<BlockHeader>()
    };
    let mut new_block = unsafe { NonNull::new_unchecked(new_block_ptr) };
    // SAFETY: `new_block` lands on freshly-owned, correctly aligned memory
    // within `block`'s backing region.
    unsafe {
        new_block.as_mut().next = header.next;
        new_block.as_mut().size = remainder - BLOCK_HDR;
        new_block.as_mut().free = true;
    }

    header.size = need;
    header.next = Some(new_block);
    Some(new_block)
}

/// Merge `block` with its immediate successor if that successor is also
/// free, growing `block`'s `size` to absorb the successor's header and
/// payload. Left-merging a freed block into its *predecessor* is expressed
/// as `coalesce_right(previous)` by the caller, since this list only links
/// forward.
///
/// Returns `true` if a merge happened.
///
/// # Safety
///
/// `block` must point at a live block whose `next` pointer (if any) is
/// also live and address-adjacent (the invariant every block in a zone
/// satisfies by construction).
pub unsafe fn coalesce_right(mut block: NonNull<BlockHeader>) -> bool {
    // SAFETY: caller guarantees `block` is live.
    let header = unsafe { block.as_mut() };
    let Some(next) = header.next else {
        return false;
    };
    // SAFETY: `next` is live per the caller's contract.
    let next_ref = unsafe { next.as_ref() };
    if !next_ref.free {
        return false;
    }
    let absorbed = BLOCK_HDR + next_ref.size;
    let next_next = next_ref.next;
    header.size += absorbed;
    header.next = next_next;
    true
}

/// Walk `head`'s address-ordered list for the first free block whose
/// payload capacity is at least `need` bytes (first-fit).
///
/// # Safety
///
/// Every block reachable from `head` must be live.
#[must_use]
pub unsafe fn find_free(
    head: Option<NonNull<BlockHeader>>,
    need: usize,
) -> Option<NonNull<BlockHeader>> {
    let need = align_up(need);
    let mut cursor = head;
    while let Some(block) = cursor {
        // SAFETY: caller guarantees every reachable block is live.
        let header = unsafe { block.as_ref() };
        if header.free && header.size >= need {
            return Some(block);
        }
        cursor = header.next;
    }
    None
}
