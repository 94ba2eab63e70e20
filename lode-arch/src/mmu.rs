//! MMU enablement for the loader's 39-bit split address space
//!
//! TTBR0 holds the identity map of the loader, TTBR1 the kernel window.
//! Both halves use a 4KB granule and start translation at the 1GB level.

use aarch64_cpu::registers::*;
use core::arch::asm;

use lode_paging::PagingFormat;
use lode_paging::arch::Aarch64;
use lode_paging::arch::arm64::VA_BITS;

use crate::TranslationRoot;
use crate::cpu::{dsb_sy, isb};

/// MAIR_EL1 value.
///
/// Index 0: Normal WB-RWA (0xFF), matches `MAIR_IDX_NORMAL`
/// Index 1: Device-nGnRnE (0x00), matches `MAIR_IDX_DEVICE`
pub const MAIR_VALUE: u64 = 0x00_FF;

/// TCR_EL1 configuration constants
mod tcr_config {
    use super::VA_BITS;

    /// T0SZ: Virtual address size for TTBR0 (25 = 39-bit VA)
    pub const T0SZ: u64 = 64 - VA_BITS as u64;
    /// T1SZ: Virtual address size for TTBR1 (25 = 39-bit VA)
    pub const T1SZ: u64 = (64 - VA_BITS as u64) << 16;
    /// TG0: Granule size for TTBR0 (0b00 = 4KB)
    pub const TG0_4KB: u64 = 0b00 << 14;
    /// TG1: Granule size for TTBR1 (0b10 = 4KB)
    pub const TG1_4KB: u64 = 0b10 << 30;
    /// IPS field shift
    pub const IPS_SHIFT: u64 = 32;
    /// SH0: Shareability for TTBR0 (0b11 = Inner Shareable)
    pub const SH0_INNER: u64 = 0b11 << 12;
    /// SH1: Shareability for TTBR1 (0b11 = Inner Shareable)
    pub const SH1_INNER: u64 = 0b11 << 28;
    /// ORGN0: Outer cacheability for TTBR0 (0b01 = WB-RWA)
    pub const ORGN0_WBRWA: u64 = 0b01 << 10;
    /// ORGN1: Outer cacheability for TTBR1 (0b01 = WB-RWA)
    pub const ORGN1_WBRWA: u64 = 0b01 << 26;
    /// IRGN0: Inner cacheability for TTBR0 (0b01 = WB-RWA)
    pub const IRGN0_WBRWA: u64 = 0b01 << 8;
    /// IRGN1: Inner cacheability for TTBR1 (0b01 = WB-RWA)
    pub const IRGN1_WBRWA: u64 = 0b01 << 24;
}

/// SCTLR_EL1 fields the loader sets or clears
mod sctlr_config {
    /// Bits 11, 20, 22, 23, 28 and 29 are RES1 in ARMv8.0
    pub const RES1: u64 = (1 << 11) | (1 << 20) | (1 << 22) | (1 << 23) | (1 << 28) | (1 << 29);
    /// MMU enable
    pub const M: u64 = 1 << 0;
    /// Alignment check
    pub const A: u64 = 1 << 1;
    /// Data cache enable
    pub const C: u64 = 1 << 2;
    /// Stack alignment check at EL1
    pub const SA: u64 = 1 << 3;
    /// Stack alignment check at EL0
    pub const SA0: u64 = 1 << 4;
    /// Instruction cache enable
    pub const I: u64 = 1 << 12;
    /// Big-endian data at EL1
    pub const EE: u64 = 1 << 25;
}

/// SCTLR_EL1 value written when translation is turned on.
///
/// Written whole, never read-modify-written: little-endian, no alignment
/// checks, MMU and both caches on.
pub const SCTLR_VALUE: u64 = sctlr_config::RES1 | sctlr_config::M | sctlr_config::C | sctlr_config::I;

const _: () = assert!(SCTLR_VALUE == 0x30D0_1805);
const _: () = assert!(
    SCTLR_VALUE & (sctlr_config::A | sctlr_config::SA | sctlr_config::SA0 | sctlr_config::EE) == 0
);

/// TCR_EL1 value for a given IPS encoding.
#[must_use]
pub const fn tcr_value(ips: u64) -> u64 {
    tcr_config::T0SZ
        | tcr_config::T1SZ
        | tcr_config::TG0_4KB
        | tcr_config::TG1_4KB
        | (ips << tcr_config::IPS_SHIFT)
        | tcr_config::SH0_INNER
        | tcr_config::SH1_INNER
        | tcr_config::ORGN0_WBRWA
        | tcr_config::ORGN1_WBRWA
        | tcr_config::IRGN0_WBRWA
        | tcr_config::IRGN1_WBRWA
}

/// Invalidate all EL1 TLB entries of this core
#[inline]
pub fn invalidate_tlb_all() {
    // SAFETY: TLB invalidation is safe
    unsafe {
        asm!(
            "tlbi vmalle1",
            "dsb nsh",
            "isb",
            options(nostack)
        );
    }
}

/// Program the translation registers and turn the MMU on.
///
/// # Safety
///
/// The tables must be complete and visible, and TTBR0 must identity map the
/// code and stack of the caller.
pub unsafe fn enable(root: TranslationRoot) {
    MAIR_EL1.set(MAIR_VALUE);
    TCR_EL1.set(tcr_value(crate::cpu::pa_range::tcr_ips()));
    TTBR0_EL1.set(Aarch64::root_register(root.self_map));
    TTBR1_EL1.set(Aarch64::root_register(root.kernel_map));
    isb();

    invalidate_tlb_all();

    SCTLR_EL1.set(SCTLR_VALUE);
    dsb_sy();
}
