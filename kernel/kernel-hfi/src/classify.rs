//! Task classification and per-CPU IPC class scores.
//!
//! Thread Director tags the running thread with a hardware class in a
//! per-thread feedback register. The raw stream is noisy — a thread hopping
//! between phases flips classes for single ticks — so a commit requires the
//! same observation on several consecutive ticks. Scheduler-facing classes
//! are 1-based so that 0 can mean "not classified yet"; hardware classes
//! are 0-based.

use crate::driver::Hfi;
use crate::hw::{CpuId, CpuModel};
use crate::regs::ThreadFeedbackChar;
use core::sync::atomic::{AtomicBool, Ordering};
use log::warn;

/// The class of a task the hardware has not (yet) classified.
pub const IPC_CLASS_UNCLASSIFIED: u16 = 0;

/// Scheduler class whose score stands in for unclassified tasks.
///
/// Most tasks end up in scheduler class 1 (hardware class 0) eventually,
/// and its score matches the performance capability of the legacy classless
/// table, so it is a sound proxy until hardware speaks up.
const HFI_UNCLASSIFIED_DEFAULT: u16 = 1;

/// Consecutive identical observations required to commit a class change.
const CLASS_DEBOUNCER_SKIPS: u16 = 4;

/// Classification state carried on each task.
#[derive(Debug, Clone, Default)]
pub struct TaskClass {
    /// Committed scheduler-facing class; [`IPC_CLASS_UNCLASSIFIED`] until
    /// the debouncer has seen a stable stream.
    ipcc: u16,
    /// Most recent observation.
    ipcc_tmp: u16,
    /// Consecutive ticks `ipcc_tmp` has been observed.
    ipcc_cntr: u16,
}

impl TaskClass {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ipcc: IPC_CLASS_UNCLASSIFIED,
            ipcc_tmp: 0,
            ipcc_cntr: 0,
        }
    }

    /// The committed class, in the scheduler's 1-based domain.
    #[must_use]
    pub const fn ipcc(&self) -> u16 {
        self.ipcc
    }
}

/// Why a score query failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    #[error("no such cpu")]
    InvalidCpu,
    #[error("class out of range")]
    InvalidClass,
    #[error("class scores not available")]
    Unavailable,
}

/// Commits `new_ipcc` onto `task` only after it has been observed on
/// `CLASS_DEBOUNCER_SKIPS` consecutive invocations.
fn debounce_and_update_class(task: &mut TaskClass, new_ipcc: u16) {
    if task.ipcc_tmp == new_ipcc {
        let debounce_skip = task.ipcc_cntr + 1;
        if debounce_skip < CLASS_DEBOUNCER_SKIPS {
            task.ipcc_cntr += 1;
        } else {
            task.ipcc = new_ipcc;
        }
    } else {
        // The observed class changed; restart the streak.
        task.ipcc_cntr = 1;
    }
    task.ipcc_tmp = new_ipcc;
}

/// Whether a hardware classification can be trusted right now.
///
/// On the hybrid parts, classes 2 and 3 are reliable unconditionally;
/// anything else is only meaningful while the SMT siblings are idle,
/// because a busy sibling skews the per-thread counters the classifier
/// feeds from. Later parts classify accurately in all conditions.
fn classification_is_accurate(model: CpuModel, hfi_class: u8, smt_siblings_idle: bool) -> bool {
    match model {
        CpuModel::AlderLake
        | CpuModel::AlderLakeL
        | CpuModel::RaptorLake
        | CpuModel::RaptorLakeP
        | CpuModel::RaptorLakeS => hfi_class == 3 || hfi_class == 2 || smt_siblings_idle,
        CpuModel::Other => true,
    }
}

static CLASSIFICATION_UNSUPPORTED_WARNED: AtomicBool = AtomicBool::new(false);

impl Hfi {
    /// Feeds the current hardware classification of the task running on
    /// `cpu` into `task`'s debouncer. Called from the scheduler tick.
    pub fn update_ipcc(&self, task: &mut TaskClass, cpu: CpuId) {
        if !self.features().itd_supported {
            if !CLASSIFICATION_UNSUPPORTED_WARNED.swap(true, Ordering::Relaxed) {
                warn!("hfi: task classification requested but not supported!");
            }
            return;
        }

        let msr = ThreadFeedbackChar::from_bits(self.hw.rdmsr(cpu, ThreadFeedbackChar::MSR));
        if !msr.valid() {
            return;
        }

        let idle = self.topology.smt_siblings_idle(cpu);
        if classification_is_accurate(self.topology.cpu_model(), msr.classid(), idle) {
            // Hardware class 0 is valid data but scheduler class 0 means
            // unclassified; shift into the 1-based domain.
            debounce_and_update_class(task, u16::from(msr.classid()) + 1);
        }
    }

    /// The published performance score of scheduler class `ipcc` on `cpu`.
    ///
    /// Unclassified tasks are scored as [`HFI_UNCLASSIFIED_DEFAULT`].
    pub fn get_ipcc_score(&self, ipcc: u16, cpu: CpuId) -> Result<i32, ScoreError> {
        if cpu >= self.topology.nr_cpu_ids() {
            return Err(ScoreError::InvalidCpu);
        }

        let ipcc = if ipcc == IPC_CLASS_UNCLASSIFIED {
            HFI_UNCLASSIFIED_DEFAULT
        } else {
            ipcc
        };
        let hfi_class = usize::from(ipcc - 1);
        if hfi_class >= self.features().nr_classes {
            return Err(ScoreError::InvalidClass);
        }

        let scores = self.ipcc_scores.as_ref().ok_or(ScoreError::Unavailable)?;
        Ok(scores[cpu * self.features().nr_classes + hfi_class].load(Ordering::Relaxed))
    }

    /// Publishes the per-class performance capabilities of `cpu` from its
    /// table row. Single writer (the update worker); scheduler readers use
    /// relaxed loads, so no lock sits on their fast path.
    pub(crate) fn set_ipcc_scores(&self, row: *const u8, cpu: CpuId) {
        let Some(scores) = self.ipcc_scores.as_ref() else {
            return;
        };
        let features = self.features();
        for class in 0..features.nr_classes {
            // Safety: the caller holds the table lock and `row` points at a
            // full row of `nr_classes * class_stride` bytes.
            let perf_cap = unsafe { *row.add(class * features.class_stride) };
            scores[cpu * features.nr_classes + class]
                .store(i32::from(perf_cap), Ordering::Relaxed);
        }
    }
}
