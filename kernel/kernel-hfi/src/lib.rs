//! # Hardware Feedback Interface processing
//!
//! The Hardware Feedback Interface (HFI) is a table that hardware populates
//! with per-CPU performance and energy-efficiency capabilities, updating it
//! as operating conditions (power budgets, thermal limits) change. One table
//! exists per die/package; hardware announces updates through the package
//! thermal interrupt.
//!
//! This crate ingests those updates: it deduplicates the per-package
//! interrupt storm down to a single winner, mirrors the hardware table into
//! a local copy under a table lock, acknowledges the update so hardware can
//! write again, and defers the expensive part — building capability events
//! for the external thermal consumer — to a work queue.
//!
//! With the `ipc-classes` feature the crate also consumes Thread Director
//! data: a per-thread hardware classification register is debounced into a
//! stable IPC class per task, and the per-class performance scores from the
//! table are published per CPU for the scheduler's load-balance fast path.
//!
//! Hardware access (CPUID leaf, MSRs), topology and the event consumer are
//! collaborator traits in [`hw`]; the subsystem itself lives in a
//! [`driver::Hfi`] value, usually the one process-wide instance installed
//! with [`init`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

#[cfg(feature = "ipc-classes")]
pub mod classify;
mod cpumask;
pub mod driver;
pub mod features;
pub mod hw;
mod instance;
pub mod regs;

#[cfg(feature = "ipc-classes")]
pub use classify::{IPC_CLASS_UNCLASSIFIED, ScoreError, TaskClass};
pub use driver::{HFI_MAX_THERM_NOTIFY_COUNT, HFI_UPDATE_INTERVAL, Hfi, InitError};
pub use hw::{CpuCapability, CpuId, CpuModel, FeedbackHw, ThermalNotify, Topology, UpdateQueue};

use kernel_sync::SyncOnceCell;
use log::debug;

/// Size of one page of the hardware table (4 KiB).
pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

static HFI: SyncOnceCell<Option<Hfi>> = SyncOnceCell::new();

/// Initializes the process-wide HFI state.
///
/// On processors without the feature the subsystem stays disabled and every
/// entry point becomes a no-op; this mirrors how optional hardware support
/// degrades. Repeated calls keep the first outcome.
pub fn init(
    hw: &'static dyn FeedbackHw,
    topology: &'static dyn Topology,
    notify: &'static dyn ThermalNotify,
    queue: &'static dyn UpdateQueue,
) {
    HFI.get_or_init(|| match Hfi::new(hw, topology, notify, queue) {
        Ok(hfi) => Some(hfi),
        Err(err) => {
            debug!("hfi: not using HFI: {err}");
            None
        }
    });
}

/// The process-wide HFI state, if [`init`] succeeded.
#[must_use]
pub fn get() -> Option<&'static Hfi> {
    HFI.get().and_then(Option::as_ref)
}

/// Enables HFI for `cpu`; see [`Hfi::online`].
pub fn online(cpu: CpuId) {
    if let Some(hfi) = get() {
        hfi.online(cpu);
    }
}

/// Removes `cpu` from its instance; see [`Hfi::offline`].
pub fn offline(cpu: CpuId) {
    if let Some(hfi) = get() {
        hfi.offline(cpu);
    }
}

/// Package thermal interrupt entry point; see [`Hfi::process_event`].
pub fn process_event(cpu: CpuId, pkg_therm_status: u64) {
    if let Some(hfi) = get() {
        hfi.process_event(cpu, pkg_therm_status);
    }
}
