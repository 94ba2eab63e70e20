//! RISC-V supervisor-mode support
//!
//! Translation is switched on by writing `satp`; there is no separate
//! enable bit. The hart id is only known from the firmware's `a0` at entry,
//! so it is not read here.

use core::arch::asm;
use core::marker::PhantomData;

use lode_common::VirtAddr;
use lode_paging::PagingFormat;

use crate::{Architecture, ENTRY_ARGS, TranslationRoot};

/// RISC-V hart using table format `F`.
pub struct RiscV<F> {
    _format: PhantomData<fn() -> F>,
}

impl<F> RiscV<F> {
    pub const fn new() -> Self {
        Self { _format: PhantomData }
    }
}

impl<F> Default for RiscV<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Full memory fence
#[inline]
pub fn fence() {
    // SAFETY: FENCE only orders memory accesses.
    unsafe {
        asm!("fence rw, rw", options(nostack));
    }
}

/// Flush all address translation caches of this hart
#[inline]
pub fn sfence_vma() {
    // SAFETY: SFENCE.VMA only invalidates cached translations.
    unsafe {
        asm!("sfence.vma", options(nostack));
    }
}

/// Synchronise the instruction stream with prior writes and translation changes
#[inline]
pub fn fence_i() {
    // SAFETY: FENCE.I only affects instruction fetch ordering.
    unsafe {
        asm!("fence.i", options(nostack));
    }
}

/// Write `satp`.
///
/// # Safety
///
/// The new translation must map the code executing this instruction.
#[inline]
pub unsafe fn write_satp(value: u64) {
    // SAFETY: Caller guarantees the new translation maps the current PC.
    unsafe {
        asm!("csrw satp, {0}", in(reg) value as usize, options(nostack));
    }
}

/// Wait for interrupt
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: WFI is always safe to call
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
}

impl<F: PagingFormat> Architecture for RiscV<F> {
    type Format = F;

    fn fence_data(&self) {
        fence();
    }

    fn fence_instructions(&self) {
        fence_i();
    }

    unsafe fn publish_translation_root(&self, root: TranslationRoot) {
        debug_assert_eq!(root.self_map, root.kernel_map);
        // SAFETY: Caller guarantees the tables are complete and map the PC.
        unsafe { write_satp(F::root_register(root.kernel_map)) };
        sfence_vma();
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
