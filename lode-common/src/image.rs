//! Loaded image descriptors
//!
//! The image loader produces one [`RegionDescriptor`] for the kernel and one
//! for the initial user program. They are created once before any page
//! table is touched and are read-only for the rest of the boot.

use crate::addr::{PhysAddr, VirtAddr};
use crate::error::BootError;

/// Physical/virtual bounds and entry point of one loaded image.
///
/// Bounds are half-open: `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct RegionDescriptor {
    /// First physical byte of the image
    pub phys_start: PhysAddr,
    /// One past the last physical byte
    pub phys_end: PhysAddr,
    /// First virtual byte of the image
    pub virt_start: VirtAddr,
    /// One past the last virtual byte
    pub virt_end: VirtAddr,
    /// Virtual entry point
    pub virt_entry: VirtAddr,
    /// Offset that turns a physical address of this image into its virtual
    /// address (`virt = phys + offset`, wrapping)
    pub phys_virt_offset: u64,
}

impl RegionDescriptor {
    /// Build a descriptor from its physical placement and virtual link range.
    ///
    /// The virtual end and the relocation offset are derived so that the
    /// region size is preserved across relocation.
    #[must_use]
    pub const fn new(
        phys_start: u64,
        phys_end: u64,
        virt_start: u64,
        virt_entry: u64,
    ) -> Self {
        let size = phys_end.wrapping_sub(phys_start);
        Self {
            phys_start: PhysAddr::new(phys_start),
            phys_end: PhysAddr::new(phys_end),
            virt_start: VirtAddr::new(virt_start),
            virt_end: VirtAddr::new(virt_start.wrapping_add(size)),
            virt_entry: VirtAddr::new(virt_entry),
            phys_virt_offset: virt_start.wrapping_sub(phys_start),
        }
    }

    /// An identity-mapped region (virt == phys) with its entry at the start.
    #[must_use]
    pub const fn identity(start: u64, end: u64) -> Self {
        Self::new(start, end, start, start)
    }

    /// Size of the region in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.phys_end.as_u64().wrapping_sub(self.phys_start.as_u64())
    }

    /// Check whether the region is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Translate a physical address inside this image to its virtual address.
    #[inline]
    #[must_use]
    pub const fn phys_to_virt(&self, pa: PhysAddr) -> VirtAddr {
        VirtAddr::new(pa.as_u64().wrapping_add(self.phys_virt_offset))
    }

    /// Check the descriptor invariants.
    ///
    /// - `phys_start <= phys_end` and `virt_start <= virt_end`
    /// - physical and virtual sizes match
    /// - `phys_virt_offset == virt_start - phys_start`
    /// - `virt_entry` lies in `[virt_start, virt_end)`
    pub fn validate(&self) -> Result<(), BootError> {
        let phys_ok = self.phys_start <= self.phys_end;
        let virt_ok = self.virt_start <= self.virt_end;
        let size_ok = self.phys_end.as_u64().wrapping_sub(self.phys_start.as_u64())
            == self.virt_end.as_u64().wrapping_sub(self.virt_start.as_u64());
        let offset_ok = self.phys_virt_offset
            == self.virt_start.as_u64().wrapping_sub(self.phys_start.as_u64());
        let entry_ok = self.virt_entry >= self.virt_start && self.virt_entry < self.virt_end;

        if phys_ok && virt_ok && size_ok && offset_ok && entry_ok && !self.is_empty() {
            Ok(())
        } else {
            Err(BootError::InvalidRegion { virt: self.virt_start, phys: self.phys_start })
        }
    }
}

/// Result of unpacking the boot archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct LoadedImages {
    /// Kernel image
    pub kernel: RegionDescriptor,
    /// Initial user program
    pub user: RegionDescriptor,
    /// Number of user images successfully unpacked
    pub num_apps: u32,
}

impl LoadedImages {
    /// Number of user images the kernel handoff expects.
    pub const EXPECTED_APPS: u32 = 1;

    /// Check the image count and both descriptors.
    ///
    /// The count is checked first so that an archive without a user image is
    /// reported as such even if its descriptors are zeroed.
    pub fn validate(&self) -> Result<(), BootError> {
        if self.num_apps != Self::EXPECTED_APPS {
            return Err(BootError::NoUserImage { found: self.num_apps });
        }
        self.kernel.validate()?;
        self.user.validate()
    }
}
