//! Parsing the CPUID enumeration into table geometry.

use crate::driver::InitError;
use crate::hw::{CpuId, FeedbackHw};
use crate::regs::HfiCapabilities;

/// Geometry of the feedback tables, common to every instance.
///
/// The table layout depends on how many capability columns and classes the
/// hardware reports: one row per CPU, one `{capability x class}` byte matrix
/// per row, header and rows padded to 8-byte multiples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HfiFeatures {
    /// Number of classes in the table (1 without Thread Director).
    pub nr_classes: usize,
    /// Size of each instance's table in pages.
    pub nr_table_pages: usize,
    /// Byte stride from one CPU row to the next.
    pub cpu_stride: usize,
    /// Byte stride from one class's capabilities to the next within a row.
    pub class_stride: usize,
    /// Size of the table header behind the timestamp.
    pub hdr_size: usize,
    /// Thread Director (and with it task classification) is available.
    pub itd_supported: bool,
}

impl HfiFeatures {
    /// Reads the enumeration leaf on `cpu` and derives the table geometry.
    pub fn parse(hw: &dyn FeedbackHw, cpu: CpuId) -> Result<Self, InitError> {
        let leaf = hw.cpuid6(cpu);

        if !leaf.eax.hfi() {
            return Err(InitError::Unsupported);
        }

        let caps = HfiCapabilities::from_bits(leaf.edx.capabilities());
        if !caps.performance() {
            return Err(InitError::NoPerformanceReporting);
        }

        // Count only the architecturally defined columns; reserved bits do
        // not widen the table.
        let nr_capabilities =
            usize::from(caps.performance()) + usize::from(caps.energy_efficiency());

        let itd_supported = leaf.eax.itd();
        let nr_classes = if itd_supported {
            usize::from(leaf.ecx.nr_classes())
        } else {
            1
        };

        // Header and per-CPU rows are both one byte per capability and
        // class, rounded up to 8-byte multiples.
        let row_bytes = (nr_capabilities * nr_classes).div_ceil(8) * 8;

        Ok(Self {
            nr_classes,
            nr_table_pages: usize::from(leaf.edx.table_pages()) + 1,
            cpu_stride: row_bytes,
            class_stride: nr_capabilities,
            hdr_size: row_bytes,
            itd_supported,
        })
    }
}
