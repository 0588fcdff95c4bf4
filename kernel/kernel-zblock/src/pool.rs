//! The pool: size-class lists, the allocation gate, and the reclaimer.

use crate::block::{SlotState, ZblockBlock};
use crate::desc::{BLOCK_DESC, NUM_BLOCK_TYPES, block_type_for};
use crate::handle::Handle;
use crate::page::{self, AllocFlags};
use crate::{PAGE_SIZE, SLOT_MASK};
use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_sync::SpinLock;
use log::debug;

use crate::list::ListInner;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// A zero-sized allocation was requested.
    #[error("allocation size must be non-zero")]
    InvalidSize,
    /// The payload cannot fit any slot; callers should store it whole.
    #[error("payload exceeds the page size")]
    OutOfSpace,
    /// The page backend refused to grow the pool.
    #[error("out of memory")]
    OutOfMemory,
}

/// Why a reclaim pass produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReclaimError {
    /// A victim was selected but no slot could be evicted this pass.
    #[error("no progress this pass; retry")]
    Retry,
    /// Every size class was exhausted without finding an eligible block.
    #[error("no block eligible for eviction")]
    NothingToEvict,
}

/// Eviction callback failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EvictError {
    /// The pool was created without eviction callbacks.
    #[error("no eviction handler registered for this pool")]
    Unregistered,
    /// The entry could not be evicted right now.
    #[error("entry is busy")]
    Busy,
}

/// Caller-supplied eviction hooks, used by [`ZblockPool::shrink`].
///
/// `evict` must relocate or discard the payload behind `handle`. It runs
/// with no pool locks held and may call back into the pool, but must not
/// free `handle` itself; the reclaimer owns that slot's transitions.
pub trait EvictOps: Send + Sync {
    fn evict(&self, pool: &ZblockPool, handle: Handle) -> Result<(), EvictError>;
}

/// A slab-style pool for compressed pages.
///
/// One [`ZblockPool`] owns a list of blocks per size class in the schedule,
/// a best-effort cache of blocks with free capacity per class, and a
/// compare-and-swap gate that keeps concurrent allocators from growing the
/// pool in parallel.
///
/// All operations take `&self`; the pool is safe to share across threads.
pub struct ZblockPool {
    lists: [SpinLock<ListInner>; NUM_BLOCK_TYPES],
    evict_ops: Option<Box<dyn EvictOps>>,
    alloc_flag: AtomicBool,
}

impl ZblockPool {
    /// Creates an empty pool.
    ///
    /// `evict_ops` is consulted by [`shrink`](Self::shrink); a pool created
    /// without it can allocate and free but never reclaim.
    #[must_use]
    pub fn new(evict_ops: Option<Box<dyn EvictOps>>) -> Self {
        Self {
            lists: core::array::from_fn(|_| SpinLock::new(ListInner::new())),
            evict_ops,
            alloc_flag: AtomicBool::new(false),
        }
    }

    /// Allocates a slot large enough for `size` bytes.
    ///
    /// The slot comes from the smallest size class that fits. A cached
    /// block with capacity is preferred; otherwise a single allocator at a
    /// time (the `alloc_flag` gate) grows the class by one fresh block.
    /// Losing the gate retries the cache first, since the winner's new
    /// block, or a concurrently freed slot, may already be visible there.
    pub fn alloc(&self, size: usize, flags: AllocFlags) -> Result<Handle, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }
        if size > PAGE_SIZE {
            return Err(AllocError::OutOfSpace);
        }

        let block_type = block_type_for(size);
        let desc = &BLOCK_DESC[block_type];
        let list = &self.lists[block_type];

        loop {
            let mut inner = list.lock();
            let mut block = inner.cache_find();
            if block.is_null() {
                drop(inner);
                if self
                    .alloc_flag
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
                {
                    // Another allocator is growing the pool; its block may
                    // land in the cache before we get the gate.
                    continue;
                }
                block = self.alloc_block(block_type, flags.for_new_block());
                if block.is_null() {
                    self.alloc_flag.store(false, Ordering::Release);
                    return Err(AllocError::OutOfMemory);
                }
                inner = list.lock();
            }

            // Safety: `block` is a live block of this class; the class lock
            // is held, and the block lock is taken before the class lock is
            // released (hand-over-hand), so the slot scan is exclusive.
            let handle = unsafe {
                (*block).lock.lock();
                (*block).free_slots -= 1;
                drop(inner);

                let spb = desc.slots_per_block as usize;
                let mut slot = 0;
                while slot < spb && (*block).slot_info[slot] != SlotState::Free {
                    slot += 1;
                }
                debug_assert!(slot < spb);
                (*block).slot_info[slot] = SlotState::Occupied;
                (*block).lock.unlock();

                Handle::encode(block, block_type, slot)
            };

            self.alloc_flag.store(false, Ordering::Release);
            return Ok(handle);
        }
    }

    /// Frees the slot behind `handle`.
    ///
    /// A block under reclaim is left alone; the reclaimer owns its slot
    /// transitions and will free or re-list the block itself. A block whose
    /// last occupied slot is freed is unlinked and its pages returned.
    pub fn free(&self, handle: Handle) {
        let (block, block_type, slot) = handle.decode();
        let desc = &BLOCK_DESC[block_type];
        let list = &self.lists[block_type];

        // Safety: the handle came from alloc on this pool, so `block` is
        // live; all metadata access below follows the class/block locking
        // rules.
        unsafe {
            if (*block).under_reclaim.load(Ordering::Relaxed) {
                return;
            }

            let mut inner = list.lock();
            let cache_idx = inner.cache_index_of(block);
            (*block).free_slots += 1;

            if (*block).free_slots == u32::from(desc.slots_per_block) {
                inner.unlink(block);
                inner.block_count -= 1;
                if let Some(i) = cache_idx {
                    inner.cache_clear(i);
                }
                drop(inner);
                page::free_pages(block.cast(), desc.order);
                return;
            }

            if cache_idx.is_none() {
                inner.cache_insert(block);
            }
            (*block).lock.lock();
            drop(inner);
            (*block).slot_info[slot] = SlotState::Free;
            (*block).lock.unlock();
        }
    }

    /// Maps the slot behind `handle` and returns a pointer to its payload.
    ///
    /// Mapping only flips the slot state; the caller must guarantee that the
    /// slot is not freed while the pointer is in use.
    pub fn map(&self, handle: Handle) -> *mut u8 {
        let (block, block_type, slot) = handle.decode();
        // Safety: handle validity per free(); state flips under block lock.
        unsafe {
            (*block).lock.lock();
            (*block).slot_info[slot] = SlotState::Mapped;
            (*block).lock.unlock();
            ZblockBlock::slot_ptr(block, slot, BLOCK_DESC[block_type].slot_size)
        }
    }

    /// Unmaps a previously mapped slot.
    pub fn unmap(&self, handle: Handle) {
        let (block, _, slot) = handle.decode();
        // Safety: handle validity per free(); state flips under block lock.
        unsafe {
            (*block).lock.lock();
            (*block).slot_info[slot] = SlotState::Unmapped;
            (*block).lock.unlock();
        }
    }

    /// Evicts the contents of one block, preferring the worst-compressed
    /// size classes and the oldest block within a class.
    ///
    /// Returns the number of slots evicted. A pass that selected a victim
    /// but evicted nothing reports [`ReclaimError::Retry`]; exhausting every
    /// class reports [`ReclaimError::NothingToEvict`].
    pub fn reclaim_block(&self) -> Result<usize, ReclaimError> {
        for block_type in (0..NUM_BLOCK_TYPES).rev() {
            let desc = &BLOCK_DESC[block_type];
            let list = &self.lists[block_type];

            let inner = list.lock();
            let block = inner.tail();
            if block.is_null() {
                continue;
            }
            // A cached block has (or recently had) free capacity; evicting
            // it would fight the allocation fast path.
            if inner.cache_index_of(block).is_some() {
                continue;
            }
            // Safety: `block` is linked into this class's list, hence live.
            // The flag fences off free() before the list lock is dropped.
            unsafe {
                (*block).under_reclaim.store(true, Ordering::Relaxed);
            }
            drop(inner);

            let mut reclaimed = 0;
            let spb = desc.slots_per_block as usize;
            for slot in 0..spb {
                // Safety: under_reclaim is set, so nothing else frees these
                // slots; occupied-state reads race only with map/unmap
                // flips, either value of which is evictable.
                unsafe {
                    let state = (*block).slot_info[slot];
                    if state != SlotState::Occupied && state != SlotState::Unmapped {
                        continue;
                    }
                    let handle = Handle::encode(block, block_type, slot);
                    if let Err(err) = self.evict(handle) {
                        debug!("zblock: eviction stopped: {err}");
                        break;
                    }
                    reclaimed += 1;
                    (*block).lock.lock();
                    (*block).slot_info[slot] = SlotState::Free;
                    (*block).lock.unlock();
                    (*block).free_slots += 1;
                }
            }

            let mut inner = list.lock();
            // Safety: the block is still ours (fenced by under_reclaim).
            unsafe {
                if (*block).free_slots < u32::from(desc.slots_per_block) {
                    (*block).under_reclaim.store(false, Ordering::Relaxed);
                    inner.cache_insert(block);
                    drop(inner);
                } else {
                    inner.unlink(block);
                    inner.block_count -= 1;
                    drop(inner);
                    page::free_pages(block.cast(), desc.order);
                }
            }

            return if reclaimed > 0 {
                Ok(reclaimed)
            } else {
                Err(ReclaimError::Retry)
            };
        }
        Err(ReclaimError::NothingToEvict)
    }

    /// Reclaims blocks until at least `target` slots have been evicted.
    ///
    /// Returns the total evicted. When not a single slot could be evicted,
    /// the last reclaim error is surfaced instead.
    pub fn shrink(&self, target: usize) -> Result<usize, ReclaimError> {
        let mut total = 0;
        let mut last = ReclaimError::NothingToEvict;
        while total < target {
            match self.reclaim_block() {
                Ok(n) => total += n,
                Err(err) => {
                    last = err;
                    break;
                }
            }
        }
        if total > 0 { Ok(total) } else { Err(last) }
    }

    /// Total bytes of page runs currently owned by the pool.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.lists
            .iter()
            .zip(BLOCK_DESC)
            .map(|(list, desc)| list.lock().block_count * (PAGE_SIZE << desc.order) as u64)
            .sum()
    }

    /// Allocates, initializes and enlists one fresh block for `block_type`.
    ///
    /// Returns null if the page backend failed. Must only be called while
    /// holding the `alloc_flag` gate.
    fn alloc_block(&self, block_type: usize, flags: AllocFlags) -> *mut ZblockBlock {
        let desc = &BLOCK_DESC[block_type];
        let base = page::alloc_pages(desc.order, flags).cast::<ZblockBlock>();
        if base.is_null() {
            return ptr::null_mut();
        }

        // Safety: the run is fresh, writable and unobserved.
        unsafe {
            ZblockBlock::init(base, desc.slots_per_block);
        }

        let mut inner = self.lists[block_type].lock();
        // Safety: the block is initialized and not yet in any list.
        unsafe {
            inner.push_front(base);
        }
        inner.cache_insert(base);
        inner.block_count += 1;
        drop(inner);
        base
    }

    fn evict(&self, handle: Handle) -> Result<(), EvictError> {
        self.evict_ops
            .as_ref()
            .map_or(Err(EvictError::Unregistered), |ops| {
                ops.evict(self, handle)
            })
    }

    /// True when the slot behind `handle` is in a non-free state.
    ///
    /// Diagnostic helper for embedders and tests; the answer is a snapshot
    /// and may be stale immediately.
    #[must_use]
    pub fn slot_in_use(&self, handle: Handle) -> bool {
        let (block, _, slot) = handle.decode();
        debug_assert!(slot <= SLOT_MASK);
        // Safety: handle validity per free().
        unsafe {
            (*block).lock.lock();
            let state = (*block).slot_info[slot];
            (*block).lock.unlock();
            state != SlotState::Free
        }
    }
}

impl Drop for ZblockPool {
    fn drop(&mut self) {
        // Return every remaining page run. No locks are needed: &mut self
        // proves there are no concurrent users.
        for (list, desc) in self.lists.iter_mut().zip(BLOCK_DESC) {
            let inner = list.get_mut();
            let mut block = inner.tail();
            while !block.is_null() {
                // Safety: blocks in the list are live; we detach them all.
                unsafe {
                    let prev = (*block).prev;
                    page::free_pages(block.cast(), desc.order);
                    block = prev;
                }
            }
        }
    }
}
