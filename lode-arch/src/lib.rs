//! # lode-arch
//!
//! Architecture support for the lode boot loader.
//!
//! The boot logic is written against the [`Architecture`] trait, which is the
//! complete set of privileged operations the loader needs:
//! - fencing table writes before they are published
//! - writing the translation root register(s)
//! - synchronising the instruction stream afterwards
//! - jumping to the kernel with its register arguments
//!
//! Implementations:
//! - [`riscv`]: Sv32/Sv39/Sv48 through `satp` (RISC-V targets only)
//! - [`cpu`] / [`mmu`]: AArch64 at EL1 with split TTBR0/TTBR1 (AArch64 only)
//!
//! # Safety
//!
//! Publishing a translation root and jumping to the kernel change what
//! addresses mean for the calling core. Both are `unsafe` and document the
//! invariants the caller must hold with `// SAFETY:` comments at each use.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

use lode_common::{PhysAddr, VirtAddr};
use lode_paging::PagingFormat;

#[cfg(target_arch = "aarch64")]
pub mod cpu;
#[cfg(target_arch = "aarch64")]
pub mod mmu;
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub mod riscv;

/// Number of register arguments the kernel entry accepts.
///
/// Each argument is one machine word, so on RV32 every value travels in a
/// single 32-bit register.
pub const ENTRY_ARGS: usize = 8;

/// Translation roots to publish.
///
/// Formats with a single root use the same table for both maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationRoot {
    /// Root holding the identity map of the loader
    pub self_map: PhysAddr,
    /// Root holding the kernel window
    pub kernel_map: PhysAddr,
}

impl TranslationRoot {
    /// A single root holding both maps.
    #[must_use]
    pub const fn shared(root: PhysAddr) -> Self {
        Self { self_map: root, kernel_map: root }
    }
}

/// Privileged operations the boot flow is built on.
///
/// Each core calls these itself, on its own behalf.
pub trait Architecture: Sync {
    /// Table format this architecture walks.
    type Format: PagingFormat;

    /// Make all prior memory writes visible to the table walker.
    fn fence_data(&self);

    /// Discard any instructions fetched under the previous translation.
    fn fence_instructions(&self);

    /// Write the translation root register(s) and turn translation on.
    ///
    /// # Safety
    ///
    /// The tables under `root` must be complete, fenced with
    /// [`Self::fence_data`], and must map the currently executing code and
    /// stack at their current addresses.
    unsafe fn publish_translation_root(&self, root: TranslationRoot);

    /// Call the kernel at `entry` with `args` in the argument registers.
    ///
    /// Returns only if the kernel returns.
    ///
    /// # Safety
    ///
    /// `entry` must be mapped executable in the active translation.
    unsafe fn jump_to(&self, entry: VirtAddr, args: &[usize; ENTRY_ARGS]);

    /// Stop this core for good.
    fn halt(&self) -> !;

    /// Hint to the core that it is in a spin-wait loop.
    #[inline]
    fn spin_hint(&self) {
        core::hint::spin_loop();
    }
}

/// Call a C ABI function at `entry` with eight register arguments.
///
/// # Safety
///
/// `entry` must be the address of code that follows the C calling
/// convention and is executable in the current translation.
#[inline(never)]
pub unsafe fn call_entry(entry: VirtAddr, args: &[usize; ENTRY_ARGS]) {
    type KernelEntry = extern "C" fn(usize, usize, usize, usize, usize, usize, usize, usize);
    // SAFETY: Caller guarantees `entry` is mapped C ABI code.
    let kernel: KernelEntry = unsafe { core::mem::transmute(entry.as_u64() as usize) };
    kernel(args[0], args[1], args[2], args[3], args[4], args[5], args[6], args[7]);
}

/// The architecture this loader is being built for.
#[cfg(target_arch = "aarch64")]
pub type Native = cpu::Aarch64Cpu;

#[cfg(all(target_arch = "riscv32", feature = "sv32"))]
pub type Native = riscv::RiscV<lode_paging::arch::Sv32>;

#[cfg(all(target_arch = "riscv64", feature = "sv48"))]
pub type Native = riscv::RiscV<lode_paging::arch::Sv48>;

#[cfg(all(target_arch = "riscv64", not(feature = "sv32"), not(feature = "sv48")))]
pub type Native = riscv::RiscV<lode_paging::arch::Sv39>;

#[cfg(all(feature = "sv32", feature = "sv48"))]
compile_error!("features `sv32` and `sv48` are mutually exclusive");

#[cfg(all(target_arch = "riscv32", not(feature = "sv32")))]
compile_error!("riscv32 targets require the `sv32` feature");

#[cfg(all(target_arch = "riscv64", feature = "sv32"))]
compile_error!("Sv32 is not available on riscv64 targets, use Sv39 or `sv48`");

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static SEEN: [AtomicUsize; ENTRY_ARGS] = [const { AtomicUsize::new(0) }; ENTRY_ARGS];

    #[allow(clippy::too_many_arguments)]
    extern "C" fn kernel(a0: usize, a1: usize, a2: usize, a3: usize, a4: usize, a5: usize, a6: usize, a7: usize) {
        for (slot, value) in SEEN.iter().zip([a0, a1, a2, a3, a4, a5, a6, a7]) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_entry_receives_one_word_per_argument() {
        let args = [0x8200_0000, 0x8201_0000, usize::MAX - 7, 0x1_0040, 0x8700_0000, 0x2000, 0x101, 2];
        // SAFETY: `kernel` is a C ABI function of this test binary
        unsafe { call_entry(VirtAddr::new(kernel as usize as u64), &args) };
        let seen: [usize; ENTRY_ARGS] = core::array::from_fn(|i| SEEN[i].load(Ordering::Relaxed));
        assert_eq!(seen, args);
    }
}
