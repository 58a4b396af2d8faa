//! Zone headers, zone sizing policy, and the address-ordered zone list.
//!
//! A zone is one `mmap`'d region, carrying a [`ZoneHeader`] at its base
//! followed by a chain of blocks (see [`crate::block`]). TINY and SMALL
//! zones are pools sized to hold at least [`crate::constants::MIN_ALLOCS`]
//! allocations at their class's limit; a LARGE zone holds exactly one
//! allocation and is sized to fit it exactly (rounded to the page size).
//!
//! Grounded on the pool-sizing policy described informally by
//! `pool/object_pool.rs` (fixed capacity computed once at construction) and
//! on `arena/thread_safe.rs`'s address-ordered chunk list for the shape of
//! the forward-linked, mutex-guarded structure.

use std::ptr::NonNull;

use crate::block::BlockHeader;
use crate::constants::{align_up, BLOCK_HDR, MIN_ALLOCS, SMALL_LIMIT, TINY_LIMIT, ZONE_HDR};
use crate::sys;

/// Which size class a zone (and the blocks it hosts) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ZoneClass {
    /// Payloads up to and including [`TINY_LIMIT`] bytes.
    Tiny,
    /// Payloads up to and including [`SMALL_LIMIT`] bytes.
    Small,
    /// Exactly one payload larger than [`SMALL_LIMIT`] bytes per zone.
    Large,
}

impl ZoneClass {
    /// Human-readable label used in the live-allocation listing (`"TINY"` /
    /// `"SMALL"` / `"LARGE"`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Tiny => "TINY",
            Self::Small => "SMALL",
            Self::Large => "LARGE",
        }
    }
}

/// Header stored in-band at the base of every zone's mapping.
#[repr(C)]
pub struct ZoneHeader {
    /// Next zone in the global, address-ordered zone list.
    pub next: Option<NonNull<ZoneHeader>>,
    /// Head of this zone's block list.
    pub blocks: Option<NonNull<BlockHeader>>,
    /// Total mapped size of this zone, header included. Needed to
    /// `munmap` the zone later.
    pub size: usize,
    /// Size class this zone serves.
    pub class: ZoneClass,
}

impl ZoneHeader {
    /// Base address of this zone's mapping, for `munmap`.
    #[must_use]
    pub fn base(zone: NonNull<ZoneHeader>) -> NonNull<u8> {
        zone.cast()
    }
}

/// Compute the total mapped size (zone header + blocks, page-aligned) for a
/// freshly created pooled zone (TINY or SMALL) able to host at least
/// [`MIN_ALLOCS`] allocations at `class`'s limit.
///
/// # Panics
///
/// Panics if `class` is [`ZoneClass::Large`]; large zones are sized by
/// [`large_zone_size`] instead, since their size depends on the single
/// request they host.
#[must_use]
pub fn pooled_zone_size(class: ZoneClass, page_size: usize) -> usize {
    let limit = match class {
        ZoneClass::Tiny => TINY_LIMIT,
        ZoneClass::Small => SMALL_LIMIT,
        ZoneClass::Large => panic!("large zones are sized per-request, not pooled"),
    };
    let per_block = BLOCK_HDR + limit;
    let raw = ZONE_HDR + per_block * MIN_ALLOCS;
    sys::round_to_page(raw, page_size)
}

/// Compute the total mapped size for a LARGE zone hosting exactly one
/// allocation of `payload_size` bytes.
#[must_use]
pub fn large_zone_size(payload_size: usize, page_size: usize) -> usize {
    let raw = ZONE_HDR + BLOCK_HDR + align_up(payload_size);
    sys::round_to_page(raw, page_size)
}

/// Map a fresh zone of `class`, sized by [`pooled_zone_size`] (TINY/SMALL)
/// or [`large_zone_size`] (LARGE, using `large_payload`), with a single
/// free block spanning its entire block region.
///
/// Returns `None` if the underlying mapping fails.
///
/// # Safety
///
/// The caller holds the engine's global mutex; this function does not
/// itself synchronize access to any shared state, it only creates a new,
/// exclusively-owned mapping.
#[must_use]
pub unsafe fn create_zone(
    class: ZoneClass,
    large_payload: usize,
    page_size: usize,
) -> Option<NonNull<ZoneHeader>> {
    let total = match class {
        ZoneClass::Large => large_zone_size(large_payload, page_size),
        _ => pooled_zone_size(class, page_size),
    };

    // SAFETY: `total` is non-zero (it includes at least `ZONE_HDR`).
    let base = unsafe { sys::map_zone(total) }?;
    let mut zone = base.cast::<ZoneHeader>();

    let block_region = total - ZONE_HDR;
    let block_payload = block_region - BLOCK_HDR;
    // SAFETY: `base` is a fresh mapping of `total` live, writable bytes;
    // `zone` and the block carved immediately after it both land inside it.
    let block_ptr = unsafe { base.as_ptr().add(ZONE_HDR).cast::<BlockHeader>() };
    let mut block = unsafe { NonNull::new_unchecked(block_ptr) };
    // LARGE zones are pre-allocated to the single caller that requested
    // them: their one block is born used, never free, and is destroyed
    // (unmapped) rather than freed back to a pool.
    let free = !matches!(class, ZoneClass::Large);
    unsafe {
        block.as_mut().next = None;
        block.as_mut().size = block_payload;
        block.as_mut().free = free;

        zone.as_mut().next = None;
        zone.as_mut().blocks = Some(block);
        zone.as_mut().size = total;
        zone.as_mut().class = class;
    }

    Some(zone)
}

/// Unmap a zone previously created by [`create_zone`].
///
/// # Safety
///
/// `zone` must not be reachable from the global zone list anymore, and
/// nothing may hold a live reference into it (header or any block/payload
/// inside it) after this call returns.
pub unsafe fn destroy_zone(zone: NonNull<ZoneHeader>) {
    // SAFETY: caller guarantees `zone` is otherwise unreferenced.
    let size = unsafe { zone.as_ref().size };
    let base = ZoneHeader::base(zone);
    // SAFETY: `base`/`size` exactly match the mapping `create_zone` made.
    unsafe { sys::unmap_zone(base, size) };
}

/// Insert `zone` into the address-ordered list rooted at `head`, returning
/// the new head.
///
/// # Safety
///
/// Every zone reachable from `head` must be live, and `zone` must not
/// already be reachable from `head`.
#[must_use]
pub unsafe fn insert_sorted(
    head: Option<NonNull<ZoneHeader>>,
    mut zone: NonNull<ZoneHeader>,
) -> Option<NonNull<ZoneHeader>> {
    let zone_addr = zone.as_ptr() as usize;

    let Some(first) = head else {
        // SAFETY: `zone` is live and not yet linked anywhere.
        unsafe { zone.as_mut().next = None };
        return Some(zone);
    };

    if (first.as_ptr() as usize) > zone_addr {
        // SAFETY: `zone`/`first` are live.
        unsafe { zone.as_mut().next = Some(first) };
        return Some(zone);
    }

    let mut cursor = first;
    loop {
        // SAFETY: `cursor` is reachable from `head`, hence live.
        let next = unsafe { cursor.as_ref().next };
        match next {
            Some(n) if (n.as_ptr() as usize) < zone_addr => cursor = n,
            _ => break,
        }
    }
    // SAFETY: `cursor` and `zone` are both live.
    unsafe {
        zone.as_mut().next = cursor.as_ref().next;
        cursor.as_mut().next = Some(zone);
    }
    Some(first)
}

/// Remove `zone` from the address-ordered list rooted at `head`, returning
/// the new head. No-op (returns `head` unchanged) if `zone` is not found.
///
/// # Safety
///
/// Every zone reachable from `head` must be live.
#[must_use]
pub unsafe fn remove(
    head: Option<NonNull<ZoneHeader>>,
    zone: NonNull<ZoneHeader>,
) -> Option<NonNull<ZoneHeader>> {
    let Some(first) = head else {
        return None;
    };
    if first == zone {
        // SAFETY: `first` is live.
        return unsafe { first.as_ref().next };
    }
    let mut cursor = first;
    loop {
        // SAFETY: `cursor` is reachable from `head`, hence live.
        let next = unsafe { cursor.as_ref().next };
        match next {
            Some(n) if n == zone => {
                // SAFETY: `n` is live.
                let after = unsafe { n.as_ref().next };
                // SAFETY: `cursor` is live.
                unsafe { cursor.as_mut().next = after };
                return Some(first);
            }
            Some(n) => cursor = n,
            None => return Some(first),
        }
    }
}
