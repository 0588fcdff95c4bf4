//! # zblock: a slab-style pool allocator for compressed pages
//!
//! zblock stores small opaque payloads (compressed pages) in *blocks*: runs
//! of `2^order` contiguous pages carved into a fixed number of equally-sized
//! slots. Every block belongs to exactly one size class from a compile-time
//! schedule, which makes placement, accounting and eviction deterministic:
//! a payload of a given size always lands in the same class, and a class's
//! blocks are interchangeable.
//!
//! The public surface is the [`pool::ZblockPool`] allocator plus a
//! [`zpool`] front-end that dispatches to registered pool drivers, of which
//! `"zblock"` is the one provided here.
//!
//! Allocations are addressed by an opaque [`handle::Handle`] that encodes
//! the block base address, the size class and the slot index in a single
//! machine word; see [`handle`] for the encoding contract.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod block;
mod desc;
pub mod handle;
mod list;
pub mod page;
pub mod pool;
pub mod zpool;

pub use handle::Handle;
pub use page::AllocFlags;
pub use pool::{AllocError, EvictError, EvictOps, ReclaimError, ZblockPool};
pub use zpool::{MapMode, Zpool};

/// Size of one page managed by the allocator (4 KiB).
pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of handle bits reserved for the slot index.
pub(crate) const SLOT_BITS: usize = 5;
/// Upper bound on slots per block implied by the handle encoding.
pub(crate) const MAX_SLOTS: usize = 1 << SLOT_BITS;
pub(crate) const SLOT_MASK: usize = MAX_SLOTS - 1;

/// Capacity of the per-size-class cache of blocks with free slots.
pub(crate) const BLOCK_CACHE_SIZE: usize = 32;
