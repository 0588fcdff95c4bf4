//! In-process fakes for the collaborator seams.
#![allow(dead_code)]

use kernel_hfi::hw::{
    CpuCapability, CpuId, CpuModel, FeedbackHw, ThermalNotify, Topology, UpdateQueue,
};
use kernel_hfi::regs::{
    Cpuid6Eax, Cpuid6Ecx, Cpuid6Edx, CpuidLeaf6, FeedbackPtr, Msr, PackageThermStatus,
};
use kernel_hfi::{Hfi, driver};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// MSR file plus CPUID leaves, one leaf per CPU.
pub struct FakeHw {
    leaves: Vec<CpuidLeaf6>,
    msrs: Mutex<HashMap<(CpuId, u32), u64>>,
    writes: Mutex<Vec<(CpuId, u32, u64)>>,
}

impl FakeHw {
    pub fn new(leaves: Vec<CpuidLeaf6>) -> Self {
        Self {
            leaves,
            msrs: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_msr(&self, cpu: CpuId, msr: Msr, value: u64) {
        self.msrs.lock().unwrap().insert((cpu, msr.raw()), value);
    }

    /// All writes to `msr`, in order, as `(cpu, value)`.
    pub fn writes_to(&self, msr: Msr) -> Vec<(CpuId, u64)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, index, _)| *index == msr.raw())
            .map(|(cpu, _, value)| (*cpu, *value))
            .collect()
    }

    /// The table region hardware was armed with, from the pointer MSR.
    pub fn table_base(&self) -> *mut u8 {
        let writes = self.writes_to(FeedbackPtr::MSR);
        let (_, raw) = writes.last().expect("feedback pointer was never programmed");
        let ptr = FeedbackPtr::from_bits(*raw);
        assert!(ptr.valid());
        ptr.address() as *mut u8
    }
}

impl FeedbackHw for FakeHw {
    fn cpuid6(&self, cpu: CpuId) -> CpuidLeaf6 {
        self.leaves[cpu]
    }

    fn rdmsr(&self, cpu: CpuId, msr: Msr) -> u64 {
        *self
            .msrs
            .lock()
            .unwrap()
            .get(&(cpu, msr.raw()))
            .unwrap_or(&0)
    }

    fn wrmsr(&self, cpu: CpuId, msr: Msr, value: u64) {
        self.writes.lock().unwrap().push((cpu, msr.raw(), value));
        self.msrs.lock().unwrap().insert((cpu, msr.raw()), value);
    }
}

/// Flat topology: every CPU on one die unless remapped.
pub struct FakeTopology {
    nr_cpus: usize,
    dies: Vec<u16>,
    packages: usize,
    dies_per_package: usize,
    pub idle: Mutex<Vec<bool>>,
    pub model: Mutex<CpuModel>,
}

impl FakeTopology {
    pub fn single_die(nr_cpus: usize) -> Self {
        Self {
            nr_cpus,
            dies: vec![0; nr_cpus],
            packages: 1,
            dies_per_package: 1,
            idle: Mutex::new(vec![true; nr_cpus]),
            model: Mutex::new(CpuModel::Other),
        }
    }

    pub fn set_idle(&self, cpu: CpuId, idle: bool) {
        self.idle.lock().unwrap()[cpu] = idle;
    }

    pub fn set_model(&self, model: CpuModel) {
        *self.model.lock().unwrap() = model;
    }
}

impl Topology for FakeTopology {
    fn nr_cpu_ids(&self) -> usize {
        self.nr_cpus
    }

    fn max_packages(&self) -> usize {
        self.packages
    }

    fn max_dies_per_package(&self) -> usize {
        self.dies_per_package
    }

    fn logical_die_id(&self, cpu: CpuId) -> Option<u16> {
        self.dies.get(cpu).copied()
    }

    fn smt_siblings_idle(&self, cpu: CpuId) -> bool {
        self.idle.lock().unwrap()[cpu]
    }

    fn cpu_model(&self) -> CpuModel {
        *self.model.lock().unwrap()
    }
}

/// Records capability batches as the external consumer would see them.
#[derive(Default)]
pub struct Recorder {
    pub batches: Mutex<Vec<Vec<CpuCapability>>>,
    pub sched_enabled: AtomicBool,
}

impl ThermalNotify for Recorder {
    fn cpu_capability_event(&self, caps: &[CpuCapability]) {
        self.batches.lock().unwrap().push(caps.to_vec());
    }

    fn sched_enable_ipc_classes(&self) {
        self.sched_enabled.store(true, Ordering::SeqCst);
    }
}

/// Records queue requests; tests run them by calling `process_pending`.
#[derive(Default)]
pub struct TestQueue {
    pub queued: Mutex<Vec<(usize, Duration)>>,
}

impl TestQueue {
    pub fn len(&self) -> usize {
        self.queued.lock().unwrap().len()
    }
}

impl UpdateQueue for TestQueue {
    fn queue_delayed(&self, instance: usize, delay: Duration) {
        self.queued.lock().unwrap().push((instance, delay));
    }
}

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// An enumeration leaf advertising both capability columns.
pub fn leaf(hfi: bool, itd: bool, nr_classes: u8, index: i16) -> CpuidLeaf6 {
    CpuidLeaf6 {
        eax: Cpuid6Eax::new().with_hfi(hfi).with_itd(itd),
        ecx: Cpuid6Ecx::new().with_nr_classes(nr_classes),
        edx: Cpuid6Edx::new()
            .with_capabilities(0b11)
            .with_table_pages(0)
            .with_index(index),
    }
}

/// A fully wired subsystem over a single-die fake machine where each CPU's
/// table row index equals its id.
pub struct Rig {
    pub hw: &'static FakeHw,
    pub topo: &'static FakeTopology,
    pub notify: &'static Recorder,
    pub queue: &'static TestQueue,
    pub hfi: Hfi,
}

pub fn rig(nr_cpus: usize, itd: bool, nr_classes: u8) -> Rig {
    let leaves = (0..nr_cpus)
        .map(|cpu| leaf(true, itd, nr_classes, cpu as i16))
        .collect();
    let hw = leak(FakeHw::new(leaves));
    let topo = leak(FakeTopology::single_die(nr_cpus));
    let notify = leak(Recorder::default());
    let queue = leak(TestQueue::default());
    let hfi = Hfi::new(hw, topo, notify, queue).expect("hardware advertises HFI");
    Rig {
        hw,
        topo,
        notify,
        queue,
        hfi,
    }
}

/// Header bytes behind the timestamp for two capability columns.
pub const fn hdr_size(nr_classes: usize) -> usize {
    (2 * nr_classes).div_ceil(8) * 8
}

/// Simulates hardware writing a new table generation: per-class
/// `(perf, ee)` pairs for each `(cpu_index, caps)` row, then the timestamp.
pub fn hw_publish(base: *mut u8, nr_classes: usize, rows: &[(usize, &[(u8, u8)])], timestamp: u64) {
    let stride = hdr_size(nr_classes);
    for &(index, caps) in rows {
        unsafe {
            let row = base.add(8 + hdr_size(nr_classes) + index * stride);
            for (class, (perf, ee)) in caps.iter().enumerate() {
                // class_stride = 2 (performance + efficiency columns)
                std::ptr::write(row.add(class * 2), *perf);
                std::ptr::write(row.add(class * 2 + 1), *ee);
            }
        }
    }
    unsafe {
        std::ptr::write_volatile(base.cast::<u64>(), timestamp);
    }
}

/// A package thermal status word with the HFI-updated bit raised.
pub fn hfi_status() -> u64 {
    PackageThermStatus::new().with_hfi_updated(true).into_bits()
}

/// Runs whatever work got queued, once each, in order.
pub fn run_pending(rig: &Rig) {
    let drained: Vec<(usize, Duration)> = rig.queue.queued.lock().unwrap().drain(..).collect();
    for (instance, delay) in drained {
        assert_eq!(delay, driver::HFI_UPDATE_INTERVAL);
        rig.hfi.process_pending(instance);
    }
}
