//! Per-size-class block list and free-slot cache.
//!
//! Blocks of one class hang off an intrusive doubly-linked list, newest at
//! the head; the tail is therefore the oldest block and the reclaimer's
//! victim. Next to the list sits a small fixed cache of blocks known (best
//! effort) to have free slots, so the allocation fast path never walks the
//! list.

use crate::BLOCK_CACHE_SIZE;
use crate::block::ZblockBlock;
use core::ptr;

/// List state of one size class; always accessed under the class lock
/// (`SpinLock<ListInner>` in the pool).
pub(crate) struct ListInner {
    head: *mut ZblockBlock,
    tail: *mut ZblockBlock,
    cache: [*mut ZblockBlock; BLOCK_CACHE_SIZE],
    pub(crate) block_count: u64,
}

// Safety: the raw pointers are only dereferenced by pool code that holds
// the class lock guarding this structure (plus the per-block lock where
// required); the blocks themselves live in pages owned by the pool.
unsafe impl Send for ListInner {}

impl ListInner {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            cache: [ptr::null_mut(); BLOCK_CACHE_SIZE],
            block_count: 0,
        }
    }

    /// Oldest block in the list, or null if the list is empty.
    pub(crate) const fn tail(&self) -> *mut ZblockBlock {
        self.tail
    }

    /// Inserts `block` at the head of the list.
    ///
    /// # Safety
    ///
    /// `block` must be a live block of this class that is not currently in
    /// any list.
    pub(crate) unsafe fn push_front(&mut self, block: *mut ZblockBlock) {
        unsafe {
            (*block).prev = ptr::null_mut();
            (*block).next = self.head;
            if self.head.is_null() {
                self.tail = block;
            } else {
                (*self.head).prev = block;
            }
            self.head = block;
        }
    }

    /// Removes `block` from the list.
    ///
    /// # Safety
    ///
    /// `block` must currently be linked into this list.
    pub(crate) unsafe fn unlink(&mut self, block: *mut ZblockBlock) {
        unsafe {
            let prev = (*block).prev;
            let next = (*block).next;
            if prev.is_null() {
                self.head = next;
            } else {
                (*prev).next = next;
            }
            if next.is_null() {
                self.tail = prev;
            } else {
                (*next).prev = prev;
            }
            (*block).prev = ptr::null_mut();
            (*block).next = ptr::null_mut();
        }
    }

    /// Returns a cached block that still has free slots, or null.
    pub(crate) fn cache_find(&self) -> *mut ZblockBlock {
        for &cached in &self.cache {
            // Safety: cached blocks belong to this class and are kept alive
            // while referenced from the cache; free_slots is read under the
            // class lock, which all writers hold.
            if !cached.is_null() && unsafe { (*cached).free_slots } > 0 {
                return cached;
            }
        }
        ptr::null_mut()
    }

    /// Cache slot currently holding `block`, if any.
    pub(crate) fn cache_index_of(&self, block: *mut ZblockBlock) -> Option<usize> {
        self.cache.iter().position(|&cached| cached == block)
    }

    pub(crate) fn cache_clear(&mut self, index: usize) {
        self.cache[index] = ptr::null_mut();
    }

    /// Inserts `block` into the cache.
    ///
    /// Empty and exhausted entries are reused first. When every entry still
    /// has capacity, the one with the fewest free slots is displaced; the
    /// displaced block stays in the list and remains discoverable there.
    pub(crate) fn cache_insert(&mut self, block: *mut ZblockBlock) {
        let mut min_free = crate::MAX_SLOTS as u32;
        let mut min_index = 0;
        for (i, &cached) in self.cache.iter().enumerate() {
            // Safety: see cache_find.
            if cached.is_null() || unsafe { (*cached).free_slots } == 0 {
                self.cache[i] = block;
                return;
            }
            let free = unsafe { (*cached).free_slots };
            if free < min_free {
                min_free = free;
                min_index = i;
            }
        }
        self.cache[min_index] = block;
    }
}
