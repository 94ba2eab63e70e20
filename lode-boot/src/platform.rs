//! Platform discovery from the device tree
//!
//! Resolves the core list and the bring-up driver, and records where the
//! blob is so it can be forwarded to the kernel unchanged.

use fdt::Fdt;

use lode_common::{BootError, PhysAddr};
use lode_pal::dtb::{self, DtbError};
use lode_pal::{SmpDriver, SmpRegistry};

use crate::config::DTB_MAX_SIZE;
use crate::cores::CoreMap;
use crate::handoff::DtbRegion;

/// What the loader knows about the machine.
pub struct Platform<const N: usize> {
    pub dtb: DtbRegion,
    pub cores: CoreMap<N>,
    /// Bring-up driver, resolved only when there are secondaries
    pub driver: Option<&'static dyn SmpDriver>,
}

impl<const N: usize> Platform<N> {
    /// Primary core only, with `dtb` forwarded as given.
    pub const fn single(primary_hw: u64, dtb: DtbRegion) -> Self {
        Self {
            dtb,
            cores: CoreMap::single(primary_hw),
            driver: None,
        }
    }
}

/// Discover the platform from the blob at `dtb_phys`.
///
/// A missing or unreadable blob is not fatal: the boot continues on the
/// primary core alone.
///
/// # Safety
///
/// If `dtb_phys` is not null it must point to readable memory.
pub unsafe fn discover<const N: usize>(
    dtb_phys: PhysAddr,
    primary_hw: u64,
    registry: &SmpRegistry,
) -> Result<Platform<N>, BootError> {
    // SAFETY: Caller guarantees the pointer is readable
    match unsafe { dtb::from_phys(dtb_phys) } {
        Ok(fdt) => discover_from(&fdt, dtb_phys, primary_hw, registry),
        Err(DtbError::NoDtbAddress) => {
            log::warn!("no device tree, booting the primary core only");
            Ok(Platform::single(primary_hw, DtbRegion::NONE))
        }
        Err(e) => {
            log::warn!("device tree at {}: {}, booting the primary core only", dtb_phys, e);
            Ok(Platform::single(primary_hw, DtbRegion { phys: dtb_phys, size: 0 }))
        }
    }
}

/// Discover the platform from a parsed blob that lives at `dtb_phys`.
pub fn discover_from<const N: usize>(
    fdt: &Fdt<'_>,
    dtb_phys: PhysAddr,
    primary_hw: u64,
    registry: &SmpRegistry,
) -> Result<Platform<N>, BootError> {
    let size = dtb::total_size(fdt);
    let region = DtbRegion { phys: dtb_phys, size: size as u64 };
    log::info!("device tree at {} ({} bytes)", dtb_phys, size);

    if size > DTB_MAX_SIZE {
        log::warn!("device tree larger than {:#x}, ignoring its cores", DTB_MAX_SIZE);
        return Ok(Platform::single(primary_hw, region));
    }
    if !cfg!(feature = "smp") {
        return Ok(Platform::single(primary_hw, region));
    }

    let mut hw_ids = [0u64; N];
    let count = match dtb::cpu_hw_ids(fdt, &mut hw_ids) {
        Ok(count) => count,
        Err(DtbError::TooManyCores(found)) => {
            return Err(BootError::TooManyCores { found, max: N });
        }
        Err(e) => {
            log::warn!("cannot list cores: {}", e);
            0
        }
    };
    let cores = CoreMap::assign(primary_hw, &hw_ids[..count])?;
    log::info!("{} core(s), primary hw id {:#x}", cores.count(), primary_hw);

    let driver = if cores.count() > 1 {
        Some(registry.resolve(dtb::driver_nodes(fdt)).ok_or(BootError::NoSmpDriver)?)
    } else {
        None
    };

    Ok(Platform { dtb: region, cores, driver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_pal::DEFAULT_REGISTRY;

    #[test]
    fn test_no_dtb_is_single_core() {
        // SAFETY: A null address is never dereferenced
        let platform = unsafe { discover::<4>(PhysAddr::new(0), 5, &DEFAULT_REGISTRY) }.unwrap();
        assert_eq!(platform.cores.count(), 1);
        assert_eq!(platform.cores.primary().hw_id, 5);
        assert_eq!(platform.dtb, DtbRegion::NONE);
        assert!(platform.driver.is_none());
    }

    #[test]
    fn test_bad_blob_forwarded_without_size() {
        let blob = [0u64; 8];
        let phys = PhysAddr::new(blob.as_ptr() as usize as u64);
        // SAFETY: `blob` is readable for its full length, and the header
        // check fails on the magic before the size is used.
        let platform = unsafe { discover::<4>(phys, 0, &DEFAULT_REGISTRY) }.unwrap();
        assert_eq!(platform.dtb, DtbRegion { phys, size: 0 });
        assert_eq!(platform.cores.count(), 1);
    }
}
