//! The block-desc schedule: the compile-time table of size classes.
//!
//! Each entry fixes a `(slot_size, slots_per_block, order)` tuple. Slot
//! sizes are derived, not chosen: a class packs `slots_per_block` slots into
//! the space a `2^order` page run has left after the in-band header, rounded
//! down to the machine word. The table is ordered by ascending slot size, so
//! class selection is "first class whose slots are big enough" and the last
//! classes hold the worst-compressed payloads.

use crate::block::ZblockBlock;
use crate::{MAX_SLOTS, PAGE_SIZE, SLOT_BITS};
use core::mem::size_of;
use static_assertions::const_assert;

/// One size class of the pool.
pub(crate) struct BlockDesc {
    pub(crate) slot_size: usize,
    pub(crate) slots_per_block: u16,
    pub(crate) order: u8,
}

/// Usable payload bytes of a `2^order` page run.
const fn block_data_size(order: u8) -> usize {
    (PAGE_SIZE << order) - size_of::<ZblockBlock>()
}

/// Largest word-aligned slot size that fits `nslots` slots into the run.
const fn slot_size(nslots: usize, order: u8) -> usize {
    (block_data_size(order) / nslots) & !(size_of::<usize>() - 1)
}

impl BlockDesc {
    const fn new(slots_per_block: u16, order: u8) -> Self {
        Self {
            slot_size: slot_size(slots_per_block as usize, order),
            slots_per_block,
            order,
        }
    }
}

/// The schedule. Denser packings (more slots, smaller pages) come first;
/// the final entry must be able to hold a whole uncompressed page.
pub(crate) const BLOCK_DESC: &[BlockDesc] = &[
    BlockDesc::new(32, 0),
    BlockDesc::new(22, 0),
    BlockDesc::new(17, 0),
    BlockDesc::new(13, 0),
    BlockDesc::new(11, 0),
    BlockDesc::new(9, 0),
    BlockDesc::new(8, 0),
    BlockDesc::new(14, 1),
    BlockDesc::new(12, 1),
    BlockDesc::new(11, 1),
    BlockDesc::new(10, 1),
    BlockDesc::new(9, 1),
    BlockDesc::new(8, 1),
    BlockDesc::new(15, 2),
    BlockDesc::new(14, 2),
    BlockDesc::new(13, 2),
    BlockDesc::new(12, 2),
    BlockDesc::new(11, 2),
    BlockDesc::new(10, 2),
    BlockDesc::new(9, 2),
    BlockDesc::new(8, 2),
    BlockDesc::new(15, 3),
    BlockDesc::new(14, 3),
    BlockDesc::new(13, 3),
    BlockDesc::new(12, 3),
    BlockDesc::new(11, 3),
    BlockDesc::new(10, 3),
    BlockDesc::new(9, 3),
    BlockDesc::new(7, 3),
];

pub(crate) const NUM_BLOCK_TYPES: usize = BLOCK_DESC.len();

// The handle encoding stores the block type in the sub-page bits above the
// slot index; the schedule must fit.
const_assert!(NUM_BLOCK_TYPES <= PAGE_SIZE >> SLOT_BITS);
// Any payload accepted by alloc (<= PAGE_SIZE) must have a class.
const_assert!(BLOCK_DESC[NUM_BLOCK_TYPES - 1].slot_size >= PAGE_SIZE);

// Slot sizes must be non-decreasing (class selection walks the table front
// to back) and every class must respect the handle's slot-index width.
const _: () = {
    let mut i = 0;
    while i < NUM_BLOCK_TYPES {
        assert!(BLOCK_DESC[i].slots_per_block as usize <= MAX_SLOTS);
        assert!(BLOCK_DESC[i].slot_size >= size_of::<usize>());
        if i > 0 {
            assert!(BLOCK_DESC[i].slot_size >= BLOCK_DESC[i - 1].slot_size);
        }
        i += 1;
    }
};

/// Returns the smallest class whose slots hold `size` bytes.
///
/// `size` must have been range-checked against `PAGE_SIZE` by the caller;
/// the schedule's last entry then guarantees a match.
pub(crate) fn block_type_for(size: usize) -> usize {
    BLOCK_DESC
        .iter()
        .position(|desc| size <= desc.slot_size)
        .unwrap_or(NUM_BLOCK_TYPES - 1)
}
