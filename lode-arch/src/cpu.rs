//! AArch64 CPU control
//!
//! Low-level barriers, identification and the [`Architecture`]
//! implementation used by the loader.

use aarch64_cpu::registers::*;
use core::arch::asm;

use lode_common::VirtAddr;
use lode_paging::arch::Aarch64;

use crate::{Architecture, ENTRY_ARGS, TranslationRoot};

/// Affinity fields of MPIDR_EL1 (Aff3:Aff2:Aff1:Aff0)
const MPIDR_AFFINITY_MASK: u64 = 0xFF_00FF_FFFF;

/// Hardware id of the calling core: the affinity bits of MPIDR_EL1.
///
/// This is the value PSCI `CPU_ON` and the device tree `reg` property use.
#[must_use]
pub fn hw_id() -> u64 {
    MPIDR_EL1.get() & MPIDR_AFFINITY_MASK
}

/// Get the current exception level
#[must_use]
pub fn current_el() -> u8 {
    ((CurrentEL.get() >> 2) & 0x3) as u8
}

/// Wait for interrupt (WFI instruction)
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: WFI is always safe to call
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
}

/// Data synchronization barrier, inner shareable
#[inline]
pub fn dsb_ish() {
    // SAFETY: Memory barrier is always safe
    unsafe {
        asm!("dsb ish", options(nostack));
    }
}

/// Data synchronization barrier
#[inline]
pub fn dsb_sy() {
    // SAFETY: Memory barrier is always safe
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Instruction synchronization barrier
#[inline]
pub fn isb() {
    // SAFETY: ISB is always safe
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Physical Address Range detection
pub mod pa_range {
    use aarch64_cpu::registers::{ID_AA64MMFR0_EL1, Readable};

    /// PARange value from ID_AA64MMFR0_EL1, which maps directly to TCR.IPS.
    ///
    /// Clamped to 48 bits.
    #[must_use]
    pub fn tcr_ips() -> u64 {
        ID_AA64MMFR0_EL1.read(ID_AA64MMFR0_EL1::PARange).min(5)
    }
}

/// AArch64 core running at EL1.
#[derive(Default)]
pub struct Aarch64Cpu;

impl Aarch64Cpu {
    pub const fn new() -> Self {
        Self
    }
}

impl Architecture for Aarch64Cpu {
    type Format = Aarch64;

    fn fence_data(&self) {
        dsb_ish();
    }

    fn fence_instructions(&self) {
        isb();
    }

    unsafe fn publish_translation_root(&self, root: TranslationRoot) {
        // SAFETY: Caller guarantees the tables are complete and identity map
        // the executing code.
        unsafe { crate::mmu::enable(root) };
    }

    unsafe fn jump_to(&self, entry: VirtAddr, args: &[usize; ENTRY_ARGS]) {
        // SAFETY: Caller guarantees the entry is mapped and executable.
        unsafe { crate::call_entry(entry, args) };
    }

    fn halt(&self) -> ! {
        loop {
            wait_for_interrupt();
        }
    }
}
