//! Page-run allocation seam.
//!
//! The pool grows and shrinks in whole page runs obtained here. In-kernel
//! this would front the page allocator; this build fronts the global heap
//! with page alignment and zeroing, which is all the pool relies on:
//! page-aligned bases (the handle encoding needs the low bits clear) and
//! zeroed data areas.

use crate::{PAGE_SHIFT, PAGE_SIZE};
use alloc::alloc::{Layout, alloc_zeroed, dealloc};

/// Placement hints accepted by [`ZblockPool::alloc`](crate::ZblockPool::alloc).
///
/// The pool strips [`HIGHMEM`](Self::HIGHMEM) and [`MOVABLE`](Self::MOVABLE)
/// before growing: block metadata lives in-band, so blocks must stay in
/// directly-addressable, unmovable memory. The heap backend itself has no
/// placement zones and treats the remaining bits as advisory.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct AllocFlags(u32);

impl AllocFlags {
    /// Ordinary allocation, no placement preference.
    pub const KERNEL: Self = Self(0);
    /// Prefer memory that is not directly addressable.
    pub const HIGHMEM: Self = Self(1 << 0);
    /// Allow the backing pages to be migrated.
    pub const MOVABLE: Self = Self(1 << 1);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The flags with the placement hints that blocks cannot honor removed.
    #[must_use]
    pub(crate) const fn for_new_block(self) -> Self {
        Self(self.0 & !(Self::HIGHMEM.0 | Self::MOVABLE.0))
    }
}

impl core::ops::BitOr for AllocFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

const fn run_layout(order: u8) -> Layout {
    // Safety: PAGE_SIZE is a power of two and order is bounded by the
    // schedule (<= 3), so the size cannot overflow.
    unsafe { Layout::from_size_align_unchecked(PAGE_SIZE << order, PAGE_SIZE) }
}

/// Allocates a zeroed, page-aligned run of `2^order` pages.
///
/// Returns null when the backend is out of memory.
pub(crate) fn alloc_pages(order: u8, _flags: AllocFlags) -> *mut u8 {
    debug_assert!(usize::BITS as usize > PAGE_SHIFT + order as usize);
    // Safety: the layout has non-zero size.
    unsafe { alloc_zeroed(run_layout(order)) }
}

/// Returns a run previously obtained from [`alloc_pages`].
///
/// # Safety
///
/// `base` must come from an `alloc_pages(order, ..)` call with the same
/// `order` and must not be used afterwards.
pub(crate) unsafe fn free_pages(base: *mut u8, order: u8) {
    if base.is_null() {
        return;
    }
    unsafe { dealloc(base, run_layout(order)) };
}
