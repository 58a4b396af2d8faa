//! Sizing constants shared by the zone and block managers.

use crate::block::BlockHeader;
use crate::zone::ZoneHeader;

/// Alignment quantum. Every block payload address is a multiple of this.
pub const ALIGN: usize = 16;

/// Upper bound (inclusive) on aligned payload size routed to a TINY zone.
pub const TINY_LIMIT: usize = 128;

/// Upper bound (inclusive) on aligned payload size routed to a SMALL zone.
/// Anything larger goes to a dedicated LARGE zone.
pub const SMALL_LIMIT: usize = 1024;

/// Minimum number of allocations a freshly created pooled zone is sized to
/// accommodate before it would need a sibling zone of the same class.
pub const MIN_ALLOCS: usize = 100;

/// Round `n` up to the next multiple of [`ALIGN`].
#[inline]
#[must_use]
pub const fn align_up(n: usize) -> usize {
    (n + (ALIGN - 1)) & !(ALIGN - 1)
}

/// `BlockHeader` size, rounded up to the alignment quantum.
pub const BLOCK_HDR: usize = align_up(core::mem::size_of::<BlockHeader>());

/// `ZoneHeader` size, rounded up to the alignment quantum.
pub const ZONE_HDR: usize = align_up(core::mem::size_of::<ZoneHeader>());
