//! Register and CPUID layouts of the feedback interface.
//!
//! Everything hardware-shaped lives here: the `CPUID.06H` enumeration words
//! and the `HW_FEEDBACK_*` / package-thermal MSRs. Loads and stores go
//! through a [`FeedbackHw`](crate::hw::FeedbackHw) backend rather than
//! `rdmsr`/`wrmsr` directly, so the layouts stay testable off-target.

use crate::PAGE_SHIFT;
use bitfield_struct::bitfield;

/// Identifies a **Model-Specific Register (MSR)** by its architectural index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(u32);

impl Msr {
    const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying raw MSR index.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// The CPUID leaf enumerating thermal and power management features,
/// including everything below.
pub const CPUID_HFI_LEAF: u32 = 6;

/// `CPUID.06H:EAX` — feature bits (only the two this subsystem gates on).
#[bitfield(u32)]
pub struct Cpuid6Eax {
    #[bits(19)]
    __: u32,
    /// Bit 19 — the Hardware Feedback Interface is present.
    pub hfi: bool,
    #[bits(3)]
    __res20_22: u8,
    /// Bit 23 — Thread Director (per-thread classification) is present.
    pub itd: bool,
    #[bits(8)]
    __res24_31: u8,
}

/// `CPUID.06H:ECX` — Thread Director enumeration.
#[bitfield(u32)]
pub struct Cpuid6Ecx {
    #[bits(8)]
    __: u8,
    /// Bits 8–15 — number of classes in the feedback table.
    #[bits(8)]
    pub nr_classes: u8,
    #[bits(16)]
    __res16_31: u16,
}

/// `CPUID.06H:EDX` — feedback table enumeration.
#[bitfield(u32)]
pub struct Cpuid6Edx {
    /// Bits 0–7 — capability columns present in the table; see
    /// [`HfiCapabilities`].
    #[bits(8)]
    pub capabilities: u8,
    /// Bits 8–11 — size of the table in pages, minus one.
    #[bits(4)]
    pub table_pages: u8,
    #[bits(4)]
    __: u8,
    /// Bits 16–31 — this CPU's row in the table; negative when the CPU has
    /// no row.
    #[bits(16)]
    pub index: i16,
}

/// The capability columns a feedback table may carry.
#[bitfield(u8)]
pub struct HfiCapabilities {
    pub performance: bool,
    pub energy_efficiency: bool,
    #[bits(6)]
    __: u8,
}

/// The three words of `CPUID.06H` as read on one CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuidLeaf6 {
    pub eax: Cpuid6Eax,
    pub ecx: Cpuid6Ecx,
    pub edx: Cpuid6Edx,
}

/// `IA32_HW_FEEDBACK_PTR` — where hardware writes the feedback table.
///
/// Programmed once per package with the physical address of the table's
/// first page; the valid bit arms it. Hardware may remember the address
/// even across disable, which is why it is never reprogrammed.
#[bitfield(u64)]
pub struct FeedbackPtr {
    pub valid: bool,
    #[bits(11)]
    __: u16,
    /// Bits 12–63 — page frame number of the table base.
    #[bits(52)]
    pub pfn: u64,
}

impl FeedbackPtr {
    pub const MSR: Msr = Msr::new(0x17D0);

    /// The table base address carried in the pointer.
    #[must_use]
    pub const fn address(self) -> u64 {
        self.pfn() << PAGE_SHIFT
    }

    /// Returns the pointer with the table base set to `address`.
    #[must_use]
    pub const fn with_address(self, address: u64) -> Self {
        self.with_pfn(address >> PAGE_SHIFT)
    }
}

/// `IA32_HW_FEEDBACK_CONFIG` — package-level enables. Set, never cleared.
#[bitfield(u64)]
pub struct FeedbackConfig {
    pub hfi_enable: bool,
    pub itd_enable: bool,
    #[bits(62)]
    __: u64,
}

impl FeedbackConfig {
    pub const MSR: Msr = Msr::new(0x17D1);
}

/// `IA32_HW_FEEDBACK_THREAD_CONFIG` — per-thread classification enable.
#[bitfield(u64)]
pub struct FeedbackThreadConfig {
    pub enable: bool,
    #[bits(63)]
    __: u64,
}

impl FeedbackThreadConfig {
    pub const MSR: Msr = Msr::new(0x17D4);
}

/// `IA32_HW_FEEDBACK_CHAR` — the running thread's hardware classification.
#[bitfield(u64)]
pub struct ThreadFeedbackChar {
    /// Bits 0–7 — hardware class of the running thread, 0-based.
    #[bits(8)]
    pub classid: u8,
    #[bits(55)]
    __: u64,
    /// Bit 63 — the classification is valid.
    pub valid: bool,
}

impl ThreadFeedbackChar {
    pub const MSR: Msr = Msr::new(0x17D2);
}

/// `IA32_PACKAGE_THERM_STATUS` — package thermal status and log bits.
///
/// The `*_log` bits are write-1-to-preserve/write-0-to-clear sticky flags;
/// acknowledging an HFI update writes the status back with every log bit
/// except `hfi_updated` preserved.
#[bitfield(u64)]
pub struct PackageThermStatus {
    pub prochot: bool,
    pub prochot_log: bool,
    pub critical_temp: bool,
    pub critical_temp_log: bool,
    pub threshold1: bool,
    pub threshold1_log: bool,
    pub threshold2: bool,
    pub threshold2_log: bool,
    pub power_limit: bool,
    pub power_limit_log: bool,
    pub power_notification: bool,
    pub power_notification_log: bool,
    #[bits(14)]
    __: u16,
    /// Bit 26 — hardware has updated the feedback table.
    pub hfi_updated: bool,
    #[bits(37)]
    __res27_63: u64,
}

impl PackageThermStatus {
    pub const MSR: Msr = Msr::new(0x1B1);

    /// All package-level log bits, including `hfi_updated`.
    pub const CLEAR_PKG_MASK: u64 = Self::new()
        .with_prochot_log(true)
        .with_critical_temp_log(true)
        .with_threshold1_log(true)
        .with_threshold2_log(true)
        .with_power_limit_log(true)
        .with_power_notification_log(true)
        .with_hfi_updated(true)
        .into_bits();

    /// The value to write back to acknowledge an HFI update: every other
    /// log bit is preserved, `hfi_updated` is cleared so hardware re-arms.
    #[must_use]
    pub const fn hfi_ack(raw: u64) -> u64 {
        raw & Self::CLEAR_PKG_MASK & !Self::new().with_hfi_updated(true).into_bits()
    }
}
