//! In-band block metadata.
//!
//! A block is `2^order` contiguous pages. Its header lives at the base of
//! the run; the data area starts immediately behind it and is partitioned
//! into `slots_per_block` slots of the class's slot size:
//!
//! ```text
//! +-----------------+--------+--------+-- ... --+--------+
//! | ZblockBlock     | slot 0 | slot 1 |         | slot N |
//! +-----------------+--------+--------+-- ... --+--------+
//! ^ page-aligned     ^ base + size_of::<ZblockBlock>()
//! ```
//!
//! Blocks are reached through raw pointers decoded from handles; all field
//! access happens through those pointers under the locking rules below.

use crate::MAX_SLOTS;
use core::mem::size_of;
use core::ptr;
use core::sync::atomic::AtomicBool;
use kernel_sync::RawSpin;

/// State of one slot within a block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum SlotState {
    Free = 0,
    Occupied = 1,
    Mapped = 2,
    Unmapped = 3,
}

/// Block header, stored in-band at the base of the page run.
///
/// Locking: `slot_info` is only written under `lock`. `free_slots` and the
/// list links are owned by the size class's list lock (with the one
/// exception of the reclaimer, which bumps `free_slots` while the block is
/// fenced off by `under_reclaim`). `under_reclaim` is atomic because
/// `free()` checks it before taking any lock.
#[repr(C)]
pub(crate) struct ZblockBlock {
    pub(crate) lock: RawSpin,
    pub(crate) prev: *mut ZblockBlock,
    pub(crate) next: *mut ZblockBlock,
    pub(crate) slot_info: [SlotState; MAX_SLOTS],
    pub(crate) free_slots: u32,
    pub(crate) under_reclaim: AtomicBool,
}

/// Byte offset from the block base to the first slot.
pub(crate) const fn data_offset() -> usize {
    size_of::<ZblockBlock>()
}

impl ZblockBlock {
    /// Writes a fresh, fully-free header into the page run at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `size_of::<ZblockBlock>()` writable
    /// bytes, suitably aligned, with no other thread observing them yet.
    pub(crate) unsafe fn init(base: *mut Self, slots_per_block: u16) {
        unsafe {
            ptr::write(
                base,
                Self {
                    lock: RawSpin::new(),
                    prev: ptr::null_mut(),
                    next: ptr::null_mut(),
                    slot_info: [SlotState::Free; MAX_SLOTS],
                    free_slots: u32::from(slots_per_block),
                    under_reclaim: AtomicBool::new(false),
                },
            );
        }
    }

    /// Pointer to the payload of `slot`, given the class's slot size.
    ///
    /// # Safety
    ///
    /// `base` must point to a live block whose class has slots of
    /// `slot_size` bytes, and `slot` must be within that class's slot count.
    pub(crate) unsafe fn slot_ptr(base: *mut Self, slot: usize, slot_size: usize) -> *mut u8 {
        unsafe { base.cast::<u8>().add(data_offset() + slot * slot_size) }
    }
}
