//! # Kernel synchronization primitives
//!
//! The primitives here are the ones the subsystem cores actually need:
//!
//! - [`RawSpin`], a `const`-constructible raw spinlock that can live inside
//!   `repr(C)` structures placed in raw memory (in-band block headers,
//!   per-instance event locks).
//! - [`SpinLock`], an RAII guard lock built on [`RawSpin`] for data that is
//!   owned by a Rust structure.
//! - [`SyncOnceCell`], a spin-based once cell for process-wide state that is
//!   initialized exactly once and read from many threads.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod raw_spin;
mod spin_lock;
mod sync_once_cell;

pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
