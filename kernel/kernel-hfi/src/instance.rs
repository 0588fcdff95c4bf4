//! Per-die/package instance state.

use crate::cpumask::CpuMask;
use crate::features::HfiFeatures;
use crate::{PAGE_SHIFT, PAGE_SIZE};
use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::mem::size_of;
use core::ptr;
use core::sync::atomic::AtomicBool;
use kernel_sync::{RawSpin, SpinLock, SyncOnceCell};

/// One die/package of the system.
///
/// The table half is initialized exactly once, by the first CPU of the
/// package to come online; the CPU mask tracks which CPUs currently feed
/// from it. The mask's lock doubles as the per-instance lifecycle lock: the
/// update worker snapshots the mask under it, so hotplug and batch
/// preparation never interleave.
pub(crate) struct HfiInstance {
    pub(crate) table: SyncOnceCell<InstanceTable>,
    pub(crate) cpus: SpinLock<CpuMask>,
}

impl HfiInstance {
    pub(crate) fn new(nr_cpus: usize) -> Self {
        Self {
            table: SyncOnceCell::new(),
            cpus: SpinLock::new(CpuMask::new(nr_cpus)),
        }
    }
}

/// The memory half of an instance: the hardware-visible table and its local
/// mirror.
///
/// Layout of both regions:
///
/// ```text
/// [ timestamp: u64 ][ header: hdr_size bytes ][ row 0 ][ row 1 ] ...
/// ```
///
/// `event_lock` elects the single CPU that processes one hardware update;
/// `table_lock` orders mirror writes (the event path's copy) against mirror
/// reads (the worker's batch build).
pub(crate) struct InstanceTable {
    /// Region hardware writes into. Never freed: hardware may keep writing
    /// to the programmed address for the lifetime of the process.
    hw_table: *mut u8,
    /// Local mirror, updated from `hw_table` under `table_lock`.
    local_table: *mut u8,
    size: usize,
    data_offset: usize,
    pub(crate) table_lock: RawSpin,
    pub(crate) event_lock: RawSpin,
    /// An update run is queued but has not executed yet.
    pub(crate) work_pending: AtomicBool,
}

// Safety: the raw regions are private to this instance; mutation of the
// mirror only happens under table_lock, and the hardware region is only
// written by the collaborator backend.
unsafe impl Send for InstanceTable {}
unsafe impl Sync for InstanceTable {}

impl InstanceTable {
    /// Allocates the hardware table (page-aligned, zeroed) and its mirror.
    ///
    /// Returns `None` if either allocation fails; a partially allocated
    /// hardware region is rolled back.
    pub(crate) fn alloc(features: &HfiFeatures) -> Option<Self> {
        let size = features.nr_table_pages << PAGE_SHIFT;

        let Ok(hw_layout) = Layout::from_size_align(size, PAGE_SIZE) else {
            return None;
        };
        let Ok(local_layout) = Layout::from_size_align(size, size_of::<u64>()) else {
            return None;
        };

        // Safety: both layouts have non-zero size (at least one page).
        let hw_table = unsafe { alloc_zeroed(hw_layout) };
        if hw_table.is_null() {
            return None;
        }
        let local_table = unsafe { alloc_zeroed(local_layout) };
        if local_table.is_null() {
            // Safety: hw_table came from hw_layout just above and was not
            // yet published anywhere.
            unsafe { dealloc(hw_table, hw_layout) };
            return None;
        }

        Some(Self {
            hw_table,
            local_table,
            size,
            data_offset: size_of::<u64>() + features.hdr_size,
            table_lock: RawSpin::new(),
            event_lock: RawSpin::new(),
            work_pending: AtomicBool::new(false),
        })
    }

    /// Address hardware is programmed with (the physical address on a real
    /// target; the region's address here).
    pub(crate) fn hw_address(&self) -> u64 {
        self.hw_table as u64
    }

    /// Timestamp of the last update copied into the mirror.
    ///
    /// Reliable only under `event_lock` (the copy path holds it).
    pub(crate) fn timestamp(&self) -> u64 {
        // Safety: local_table is at least 8 aligned bytes.
        unsafe { ptr::read(self.local_table.cast::<u64>()) }
    }

    /// Timestamp currently at the head of the hardware region.
    ///
    /// Hardware updates the region asynchronously; read volatile.
    pub(crate) fn hw_timestamp(&self) -> u64 {
        // Safety: hw_table is at least 8 aligned bytes.
        unsafe { ptr::read_volatile(self.hw_table.cast::<u64>()) }
    }

    /// Copies the whole hardware region (timestamp included) into the
    /// mirror.
    ///
    /// # Safety
    ///
    /// The caller must hold `table_lock`; concurrent mirror readers would
    /// otherwise observe a torn table.
    pub(crate) unsafe fn copy_from_hw(&self) {
        unsafe {
            ptr::copy_nonoverlapping(self.hw_table, self.local_table, self.size);
        }
    }

    /// Pointer to the mirror row of the CPU with table index `index`.
    ///
    /// # Safety
    ///
    /// The caller must hold `table_lock` and `index` must be a row index
    /// enumerated by hardware for this table.
    pub(crate) unsafe fn row(&self, index: usize, features: &HfiFeatures) -> *const u8 {
        debug_assert!(self.data_offset + (index + 1) * features.cpu_stride <= self.size);
        unsafe { self.local_table.add(self.data_offset + index * features.cpu_stride) }
    }
}

impl Drop for InstanceTable {
    fn drop(&mut self) {
        // The mirror is ours; the hardware region stays allocated (see the
        // field docs).
        let Ok(layout) = Layout::from_size_align(self.size, size_of::<u64>()) else {
            return;
        };
        // Safety: local_table was allocated with exactly this layout.
        unsafe { dealloc(self.local_table, layout) };
    }
}
