//! Kernel entry handoff
//!
//! The kernel is entered with everything in registers:
//!
//! | reg     | value                          |
//! |---------|--------------------------------|
//! | a0 / x0 | user image physical start      |
//! | a1 / x1 | user image physical end        |
//! | a2 / x2 | user phys -> virt offset       |
//! | a3 / x3 | user virtual entry             |
//! | a4 / x4 | device tree physical address   |
//! | a5 / x5 | device tree size               |
//! | a6 / x6 | hardware core id (`smp` only)  |
//! | a7 / x7 | logical core id (`smp` only)   |
//!
//! Without `smp` the last two registers are zero.

use lode_arch::{Architecture, ENTRY_ARGS};
use lode_common::{BootError, CoreIdentity, PhysAddr, RegionDescriptor};

use crate::activation::{Activation, Active};

/// Device tree blob as forwarded to the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DtbRegion {
    pub phys: PhysAddr,
    pub size: u64,
}

impl DtbRegion {
    /// No device tree.
    pub const NONE: Self = Self { phys: PhysAddr::new(0), size: 0 };
}

/// Arguments of the kernel entry call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandoffArgs {
    pub user_phys_start: u64,
    pub user_phys_end: u64,
    pub user_pv_offset: u64,
    pub user_virt_entry: u64,
    pub dtb_phys: u64,
    pub dtb_size: u64,
    pub core: CoreIdentity,
}

impl HandoffArgs {
    #[must_use]
    pub fn new(user: &RegionDescriptor, dtb: DtbRegion, core: CoreIdentity) -> Self {
        Self {
            user_phys_start: user.phys_start.as_u64(),
            user_phys_end: user.phys_end.as_u64(),
            user_pv_offset: user.phys_virt_offset,
            user_virt_entry: user.virt_entry.as_u64(),
            dtb_phys: dtb.phys.as_u64(),
            dtb_size: dtb.size,
            core,
        }
    }

    /// Register values in argument order, one machine word each.
    ///
    /// Addresses fit a word on every supported target. The offset wraps, so
    /// on RV32 it is still the distance modulo 2^32.
    #[must_use]
    pub fn registers(&self) -> [usize; ENTRY_ARGS] {
        let (hw_id, logical_id) = if cfg!(feature = "smp") {
            (self.core.hw_id as usize, self.core.logical_id)
        } else {
            (0, 0)
        };
        [
            self.user_phys_start as usize,
            self.user_phys_end as usize,
            self.user_pv_offset as usize,
            self.user_virt_entry as usize,
            self.dtb_phys as usize,
            self.dtb_size as usize,
            hw_id,
            logical_id,
        ]
    }
}

/// Jump to the kernel entry of `kernel` with `args`.
///
/// Only returns if the kernel does, which is always an error.
///
/// # Safety
///
/// `kernel` must be mapped by the active translation and its entry must be
/// kernel code following the C calling convention.
pub unsafe fn enter_kernel<A: Architecture>(
    vm: &Activation<'_, A, Active>,
    kernel: &RegionDescriptor,
    args: &HandoffArgs,
) -> BootError {
    let registers = args.registers();
    log::info!(
        "core {}: entering kernel at {} (user {:#x}..{:#x})",
        args.core.logical_id,
        kernel.virt_entry,
        args.user_phys_start,
        args.user_phys_end
    );
    // SAFETY: Caller guarantees the entry is mapped kernel code; the Active
    // state guarantees translation is on.
    unsafe { vm.arch().jump_to(kernel.virt_entry, &registers) };
    BootError::UnexpectedReturn { entry: kernel.virt_entry }
}
