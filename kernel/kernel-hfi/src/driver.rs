//! The feedback processor: lifecycle, event handling, and the update worker.

use crate::features::HfiFeatures;
use crate::hw::{CpuCapability, CpuId, FeedbackHw, ThermalNotify, Topology, UpdateQueue};
use crate::instance::{HfiInstance, InstanceTable};
use crate::regs::{FeedbackConfig, FeedbackPtr, FeedbackThreadConfig, PackageThermStatus};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI16, Ordering};
use core::time::Duration;
use log::{debug, warn};

/// Delay between a hardware update and the deferred processing run.
pub const HFI_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Capability records per batch delivered to the thermal consumer.
pub const HFI_MAX_THERM_NOTIFY_COUNT: usize = 16;

/// Why HFI could not be initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// The processor does not implement the feedback interface.
    #[error("hardware feedback interface not present")]
    Unsupported,
    /// The table carries no performance column, which every consumer needs.
    #[error("performance capability reporting not present")]
    NoPerformanceReporting,
}

/// Links one logical CPU to its instance and its row in the table.
///
/// Both fields are written at online time and read lock-free from the
/// interrupt path, hence the atomics. A non-negative `index` implies
/// `instance` is set.
pub(crate) struct HfiCpuInfo {
    /// Row of this CPU in its table, `-1` until enumerated.
    pub(crate) index: AtomicI16,
    /// Instance of this CPU's die/package, `-1` until linked.
    pub(crate) instance: AtomicI16,
}

impl HfiCpuInfo {
    fn new() -> Self {
        Self {
            index: AtomicI16::new(-1),
            instance: AtomicI16::new(-1),
        }
    }
}

/// The feedback subsystem.
///
/// Owns one [`HfiInstance`] per possible die/package, the per-CPU links
/// into them, and (with `ipc-classes`) the published per-CPU class scores.
pub struct Hfi {
    features: HfiFeatures,
    instances: Box<[HfiInstance]>,
    cpu_info: Box<[HfiCpuInfo]>,
    #[cfg(feature = "ipc-classes")]
    pub(crate) ipcc_scores: Option<Box<[core::sync::atomic::AtomicI32]>>,
    pub(crate) hw: &'static dyn FeedbackHw,
    pub(crate) topology: &'static dyn Topology,
    notify: &'static dyn ThermalNotify,
    queue: &'static dyn UpdateQueue,
}

impl core::fmt::Debug for Hfi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hfi")
            .field("features", &self.features)
            .field("instances", &self.instances.len())
            .field("cpu_info", &self.cpu_info.len())
            .finish_non_exhaustive()
    }
}

impl Hfi {
    /// Parses the hardware enumeration and builds the (still empty)
    /// instance and per-CPU arrays.
    ///
    /// Instances allocate their tables lazily, when their first CPU comes
    /// [`online`](Self::online).
    pub fn new(
        hw: &'static dyn FeedbackHw,
        topology: &'static dyn Topology,
        notify: &'static dyn ThermalNotify,
        queue: &'static dyn UpdateQueue,
    ) -> Result<Self, InitError> {
        let features = HfiFeatures::parse(hw, 0)?;

        let max_instances = topology.max_packages() * topology.max_dies_per_package();
        let nr_cpus = topology.nr_cpu_ids();

        let instances = (0..max_instances)
            .map(|_| HfiInstance::new(nr_cpus))
            .collect();
        let cpu_info = (0..nr_cpus).map(|_| HfiCpuInfo::new()).collect();

        #[cfg(feature = "ipc-classes")]
        let ipcc_scores = features.itd_supported.then(|| {
            (0..nr_cpus * features.nr_classes)
                .map(|_| core::sync::atomic::AtomicI32::new(0))
                .collect()
        });

        Ok(Self {
            features,
            instances,
            cpu_info,
            #[cfg(feature = "ipc-classes")]
            ipcc_scores,
            hw,
            topology,
            notify,
            queue,
        })
    }

    pub(crate) fn features(&self) -> &HfiFeatures {
        &self.features
    }

    /// Enables HFI for `cpu`.
    ///
    /// The first CPU of a die/package to come online performs the full
    /// instance setup: table allocation, hardware programming, interface
    /// enable. Later CPUs only link themselves to the existing instance.
    /// Hardware is programmed with the table address exactly once per
    /// instance and the interface is never disabled again: some processors
    /// keep writing to a previously programmed address even after a
    /// reprogram, so reallocation would corrupt memory.
    pub fn online(&self, cpu: CpuId) {
        let Some(info) = self.cpu_info.get(cpu) else {
            return;
        };
        let Some(die_id) = self.topology.logical_die_id(cpu) else {
            return;
        };
        let die_id = usize::from(die_id);
        if die_id >= self.instances.len() {
            return;
        }
        let instance = &self.instances[die_id];

        if info.instance.load(Ordering::Relaxed) < 0 {
            info.instance.store(die_id as i16, Ordering::Relaxed);
        }

        // The row index never changes; keep the first enumeration.
        if info.index.load(Ordering::Relaxed) < 0 {
            let edx = self.hw.cpuid6(cpu).edx;
            info.index.store(edx.index(), Ordering::Relaxed);
        }

        if self.features.itd_supported {
            self.hw.wrmsr(
                cpu,
                FeedbackThreadConfig::MSR,
                FeedbackThreadConfig::new().with_enable(true).into_bits(),
            );
        }

        let mut cpus = instance.cpus.lock();
        if instance.table.get().is_some() {
            // Another CPU of this package already did the setup.
            cpus.set(cpu);
            return;
        }

        let Some(table) = InstanceTable::alloc(&self.features) else {
            warn!("hfi: out of memory setting up instance {die_id}");
            return;
        };

        let ptr = FeedbackPtr::new()
            .with_valid(true)
            .with_address(table.hw_address());
        self.hw.wrmsr(cpu, FeedbackPtr::MSR, ptr.into_bits());

        instance.table.get_or_init(|| table);
        cpus.set(cpu);

        let mut config = FeedbackConfig::from_bits(self.hw.rdmsr(cpu, FeedbackConfig::MSR));
        config.set_hfi_enable(true);
        if self.features.itd_supported {
            config.set_itd_enable(true);
        }
        self.hw.wrmsr(cpu, FeedbackConfig::MSR, config.into_bits());

        // Classification works from here on; scores stay zero until the
        // first table update, which is fine for the scheduler.
        if self.features.itd_supported {
            self.notify.sched_enable_ipc_classes();
        }
    }

    /// Removes `cpu` from its instance's coverage.
    ///
    /// Memory stays allocated and hardware stays programmed; see
    /// [`online`](Self::online).
    pub fn offline(&self, cpu: CpuId) {
        let Some(info) = self.cpu_info.get(cpu) else {
            return;
        };
        let idx = info.instance.load(Ordering::Relaxed);
        if idx < 0 {
            return;
        }
        let instance = &self.instances[idx as usize];
        if instance.table.get().is_none() {
            return;
        }
        instance.cpus.lock().clear(cpu);
    }

    /// Package thermal interrupt entry point.
    ///
    /// Every CPU of a package may arrive here for the same hardware update;
    /// the instance's event lock elects one winner to copy and acknowledge,
    /// the rest leave immediately. Must not block: the only lock taken
    /// unconditionally is the table lock, whose holders never block either.
    pub fn process_event(&self, cpu: CpuId, pkg_therm_status: u64) {
        if pkg_therm_status == 0 {
            return;
        }
        let Some(info) = self.cpu_info.get(cpu) else {
            return;
        };
        let idx = info.instance.load(Ordering::Relaxed);
        if idx < 0 {
            debug!("hfi: event on cpu {cpu} without an instance");
            return;
        }
        let instance = &self.instances[idx as usize];
        let Some(table) = instance.table.get() else {
            debug!("hfi: event on cpu {cpu} before instance init");
            return;
        };

        if !table.event_lock.try_lock() {
            return;
        }

        // Hardware raises one interrupt per package per update on every
        // CPU; a timestamp we already mirrored means this is an echo.
        let new_timestamp = table.hw_timestamp();
        if table.timestamp() == new_timestamp {
            // Safety: acquired above.
            unsafe { table.event_lock.unlock() };
            return;
        }

        table.table_lock.lock();
        // Safety: table_lock is held.
        unsafe {
            table.copy_from_hw();
            table.table_lock.unlock();
            table.event_lock.unlock();
        }

        // Tell hardware the table has been consumed; it is free to write
        // the next update and raise the interrupt again.
        self.hw.wrmsr(
            cpu,
            PackageThermStatus::MSR,
            PackageThermStatus::hfi_ack(pkg_therm_status),
        );

        if !table.work_pending.swap(true, Ordering::AcqRel) {
            self.queue.queue_delayed(idx as usize, HFI_UPDATE_INTERVAL);
        }
    }

    /// Executes the deferred update work for `instance`.
    ///
    /// Called by the [`UpdateQueue`] implementation from its worker
    /// context.
    pub fn process_pending(&self, instance: usize) {
        let Some(inst) = self.instances.get(instance) else {
            return;
        };
        let Some(table) = inst.table.get() else {
            return;
        };
        table.work_pending.store(false, Ordering::Release);
        self.update_capabilities(inst, table);
    }

    /// Builds capability records from the mirror and emits them in bounded
    /// batches.
    fn update_capabilities(&self, inst: &HfiInstance, table: &InstanceTable) {
        // Holding the mask lock across the whole run keeps hotplug out: the
        // set of CPUs reported matches one consistent moment.
        let cpus = inst.cpus.lock();
        let cpu_count = cpus.weight();
        if cpu_count == 0 {
            // All CPUs went away between scheduling and running the work.
            return;
        }

        let mut caps = Vec::with_capacity(cpu_count);

        table.table_lock.lock();
        for cpu in cpus.iter() {
            let index = self.cpu_info[cpu].index.load(Ordering::Relaxed);
            debug_assert!(index >= 0);
            if index < 0 {
                continue;
            }

            // Safety: table_lock is held and the index was enumerated by
            // hardware for this CPU.
            let row = unsafe { table.row(index as usize, &self.features) };
            let (perf_cap, ee_cap) = unsafe { (*row, *row.add(1)) };

            // Scale the 8-bit capabilities to the consumer's [0, 1023].
            caps.push(CpuCapability {
                cpu,
                performance: u16::from(perf_cap) << 2,
                efficiency: u16::from(ee_cap) << 2,
            });

            #[cfg(feature = "ipc-classes")]
            self.set_ipcc_scores(row, cpu);
        }
        // Safety: acquired above.
        unsafe { table.table_lock.unlock() };

        for chunk in caps.chunks(HFI_MAX_THERM_NOTIFY_COUNT) {
            self.notify.cpu_capability_event(chunk);
        }
    }
}
