//! Collaborator seams: hardware access, topology, and event consumers.
//!
//! The subsystem core never touches hardware or the scheduler directly; it
//! goes through the traits here. On a real target these are thin shims over
//! `cpuid`/`rdmsr`/`wrmsr` and the topology code; under test they are
//! in-process fakes.

use crate::regs::{CpuidLeaf6, Msr};
use core::time::Duration;

/// Logical CPU id, dense in `0..nr_cpu_ids`.
pub type CpuId = usize;

/// Processor models as far as this subsystem cares.
///
/// The hybrid models enumerate the parts whose classification results are
/// only trustworthy under the conditions checked by the classifier; every
/// other model reports accurately all the time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpuModel {
    AlderLake,
    AlderLakeL,
    RaptorLake,
    RaptorLakeP,
    RaptorLakeS,
    Other,
}

/// CPUID and MSR access on a specific logical CPU.
///
/// `wrmsr` side effects are the contract: writing
/// [`FeedbackPtr::MSR`](crate::regs::FeedbackPtr) arms table generation at
/// the programmed address, and writing
/// [`PackageThermStatus::MSR`](crate::regs::PackageThermStatus) with the
/// update bit cleared re-arms the update interrupt.
pub trait FeedbackHw: Send + Sync {
    fn cpuid6(&self, cpu: CpuId) -> CpuidLeaf6;
    fn rdmsr(&self, cpu: CpuId, msr: Msr) -> u64;
    fn wrmsr(&self, cpu: CpuId, msr: Msr, value: u64);
}

/// System topology as seen by the feedback subsystem.
pub trait Topology: Send + Sync {
    /// Number of possible logical CPU ids (not necessarily all online).
    fn nr_cpu_ids(&self) -> usize;
    fn max_packages(&self) -> usize;
    fn max_dies_per_package(&self) -> usize;
    /// System-wide logical die id of `cpu`, or `None` for an invalid cpu.
    fn logical_die_id(&self, cpu: CpuId) -> Option<u16>;
    /// Whether every SMT sibling of `cpu` is currently idle.
    fn smt_siblings_idle(&self, cpu: CpuId) -> bool;
    fn cpu_model(&self) -> CpuModel;
}

/// One CPU's capabilities, scaled to the consumer's `[0, 1023]` domain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CpuCapability {
    pub cpu: CpuId,
    pub performance: u16,
    pub efficiency: u16,
}

/// The external consumer of capability updates, plus the scheduler bridge.
pub trait ThermalNotify: Send + Sync {
    /// Delivers one batch of capability records. Batches never exceed
    /// [`HFI_MAX_THERM_NOTIFY_COUNT`](crate::driver::HFI_MAX_THERM_NOTIFY_COUNT)
    /// records.
    fn cpu_capability_event(&self, caps: &[CpuCapability]);

    /// Tells the scheduler that IPC class data is available from now on.
    fn sched_enable_ipc_classes(&self);
}

/// Deferred execution of per-instance update work.
///
/// An implementation runs `Hfi::process_pending(instance)` once, `delay`
/// after the request, on a single worker context. The core requests at most
/// one pending run per instance at a time.
pub trait UpdateQueue: Send + Sync {
    fn queue_delayed(&self, instance: usize, delay: Duration);
}
