//! Address-space assembly
//!
//! Builds the two mappings every core activates:
//!
//! - the identity self-map of the loader's own image, so the instruction
//!   after the root write still fetches from the same frame
//! - the kernel window, mapping the kernel's physical placement at its
//!   link address
//!
//! Formats with a single root put both mappings in one tree. Split-root
//! formats (AArch64) get one root per mapping.
//!
//! A console driven through MMIO also gets a device identity leaf in the
//! self-map, so diagnostics keep working once translation is on.
//!
//! Every mapping is planned before the first table write: a failure leaves
//! the roots empty.

use lode_arch::TranslationRoot;
use lode_common::{BootError, PhysAddr, RegionDescriptor, VirtAddr};
use lode_paging::{FrameId, MapError, Memory, PAGE_SIZE, PageTableBuilder, PagingFormat, TableStorage, translate};

/// Physical extent of the running loader image, and the MMIO console it
/// logs through, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Footprint {
    pub start: PhysAddr,
    pub end: PhysAddr,
    pub console: Option<PhysAddr>,
}

impl Footprint {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start: PhysAddr::new(start),
            end: PhysAddr::new(end),
            console: None,
        }
    }

    /// Also identity-map the console registers at `base` as device memory.
    #[must_use]
    pub const fn with_console(self, base: u64) -> Self {
        Self {
            console: Some(PhysAddr::new(base)),
            ..self
        }
    }

    #[must_use]
    pub fn contains(&self, pa: PhysAddr) -> bool {
        pa >= self.start && pa < self.end
    }
}

/// Roots of an assembled address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressSpace {
    /// Root holding the identity self-map
    pub self_map: FrameId,
    /// Root holding the kernel window; equal to `self_map` for single-root formats
    pub kernel_map: FrameId,
}

impl AddressSpace {
    /// Physical root addresses to publish.
    #[must_use]
    pub fn translation_root<S: TableStorage>(&self, storage: &S) -> TranslationRoot {
        TranslationRoot {
            self_map: storage.frame_address(self.self_map),
            kernel_map: storage.frame_address(self.kernel_map),
        }
    }

    #[must_use]
    pub fn is_split(&self) -> bool {
        self.self_map != self.kernel_map
    }
}

/// Build the self-map of `footprint` and the kernel window of `kernel`.
pub fn assemble<F: PagingFormat, S: TableStorage>(
    storage: &mut S,
    footprint: &Footprint,
    kernel: &RegionDescriptor,
) -> Result<AddressSpace, BootError> {
    kernel.validate()?;

    let self_map = storage.allocate().ok_or(BootError::TableStorageExhausted)?;
    let kernel_map = if F::SPLIT_ROOTS {
        storage.allocate().ok_or(BootError::TableStorageExhausted)?
    } else {
        self_map
    };

    let mut builder = PageTableBuilder::<F, S>::new(storage);

    let identity = builder.plan_identity(self_map, footprint.start, footprint.end, Memory::Normal)?;
    let console = match footprint.console {
        Some(base) => {
            let plan = builder.plan_identity(self_map, base, base.offset(PAGE_SIZE as u64), Memory::Device)?;
            if plan.overlaps(&identity) {
                log::warn!("console {} shares the loader's {:?} leaf", base, identity.tier);
                None
            } else {
                Some(plan)
            }
        }
        None => None,
    };
    let window = builder.plan(kernel_map, kernel.virt_start, kernel.phys_start, kernel.size())?;

    if self_map == kernel_map {
        for plan in core::iter::once(&identity).chain(console.as_ref()) {
            if window.conflicts(plan) {
                return Err(MapError::Overlap { virt: kernel.virt_start }.into());
            }
        }
    }
    let needed = identity.new_tables + console.map_or(0, |plan| plan.new_tables) + window.new_tables;
    if needed > builder.storage().frames_available() {
        return Err(BootError::TableStorageExhausted);
    }

    builder.apply(self_map, &identity)?;
    log::debug!(
        "self-map {}..{} as {:?} x{}",
        footprint.start,
        footprint.end,
        identity.tier,
        identity.steps
    );
    if let Some(plan) = &console {
        builder.apply(self_map, plan)?;
        log::debug!("console {} mapped as device memory", plan.phys);
    }
    builder.apply(kernel_map, &window)?;
    log::info!(
        "kernel window {} -> {} ({:?} tier, {} x {:#x})",
        kernel.virt_start,
        kernel.phys_start,
        window.tier,
        window.steps,
        window.granule
    );

    Ok(AddressSpace { self_map, kernel_map })
}

/// Check that `addr` inside the loader translates to itself through the
/// self-map.
pub fn check_self_map<F: PagingFormat, S: TableStorage>(
    storage: &S,
    space: &AddressSpace,
    addr: PhysAddr,
) -> Result<(), BootError> {
    match translate::<F, S>(storage, space.self_map, VirtAddr::new(addr.as_u64())) {
        Some(pa) if pa == addr => Ok(()),
        _ => Err(BootError::SelfMapMissing { addr }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_paging::arch::{Aarch64, Sv39};
    use lode_paging::{BootTables, Entry};

    const KERNEL_VIRT: u64 = 0xFFFF_FFFF_8000_0000;
    const LOADER: Footprint = Footprint::new(0x8020_0000, 0x8023_4000);
    const ARM_LOADER: Footprint = Footprint::new(0x4008_0000, 0x400C_0000);
    const UART: u64 = 0x0900_0000;

    fn scenario_a_kernel() -> RegionDescriptor {
        RegionDescriptor::new(0x8000_0000, 0x8100_0000, KERNEL_VIRT, KERNEL_VIRT + 0x1000)
    }

    #[test]
    fn test_single_root_holds_both_maps() {
        let mut tables = BootTables::<Sv39, 4>::new();
        let space = assemble::<Sv39, _>(&mut tables, &LOADER, &scenario_a_kernel()).unwrap();

        assert!(!space.is_split());
        assert_eq!(tables.used(), 1);
        assert_eq!(tables.valid_entries(space.self_map), 2);

        let root = space.kernel_map;
        assert!(matches!(tables.entry(root, 0, 510), Entry::Leaf { .. }));
        assert_eq!(
            translate::<Sv39, _>(&tables, root, VirtAddr::new(KERNEL_VIRT + 0x1000)),
            Some(PhysAddr::new(0x8000_1000))
        );
        check_self_map::<Sv39, _>(&tables, &space, PhysAddr::new(0x8021_0040)).unwrap();
    }

    #[test]
    fn test_split_roots() {
        let mut tables = BootTables::<Aarch64, 4>::new();
        let space = assemble::<Aarch64, _>(&mut tables, &LOADER, &scenario_a_kernel()).unwrap();

        assert!(space.is_split());
        assert_eq!(tables.valid_entries(space.self_map), 1);
        assert_eq!(tables.valid_entries(space.kernel_map), 1);

        // The identity range is not reachable through the kernel root
        assert_eq!(
            translate::<Aarch64, _>(&tables, space.kernel_map, VirtAddr::new(0x8020_0000)),
            None
        );
        check_self_map::<Aarch64, _>(&tables, &space, LOADER.start).unwrap();

        let root = space.translation_root(&tables);
        assert_eq!(root.self_map, tables.frame_address(space.self_map));
        assert_ne!(root.self_map, root.kernel_map);
    }

    #[test]
    fn test_kernel_fallback_tier() {
        let kernel = RegionDescriptor::new(0x8040_0000, 0x8060_0000, KERNEL_VIRT + 0x20_0000, KERNEL_VIRT + 0x20_0000);
        let mut tables = BootTables::<Sv39, 4>::new();
        let space = assemble::<Sv39, _>(&mut tables, &LOADER, &kernel).unwrap();

        assert_eq!(tables.used(), 2);
        assert_eq!(
            translate::<Sv39, _>(&tables, space.kernel_map, VirtAddr::new(KERNEL_VIRT + 0x20_0000)),
            Some(PhysAddr::new(0x8040_0000))
        );
    }

    #[test]
    fn test_misaligned_kernel_leaves_roots_empty() {
        let kernel = RegionDescriptor::new(0x8000_1000, 0x8010_1000, KERNEL_VIRT, KERNEL_VIRT);

        let mut tables = BootTables::<Sv39, 4>::new();
        let err = assemble::<Sv39, _>(&mut tables, &LOADER, &kernel).unwrap_err();
        assert!(matches!(err, BootError::MisalignedRegion { .. }));
        assert_eq!(tables.used(), 1);
        assert_eq!(tables.valid_entries(FrameId(0)), 0);

        let mut tables = BootTables::<Aarch64, 4>::new();
        let footprint = ARM_LOADER.with_console(UART);
        let err = assemble::<Aarch64, _>(&mut tables, &footprint, &kernel).unwrap_err();
        assert!(matches!(err, BootError::MisalignedRegion { .. }));
        assert_eq!(tables.valid_entries(FrameId(0)), 0);
        assert_eq!(tables.valid_entries(FrameId(1)), 0);
    }

    #[test]
    fn test_kernel_over_self_map_rejected_without_writes() {
        // Single root: a kernel window on top of the loader's identity leaf
        let kernel = RegionDescriptor::new(0xC000_0000, 0xC100_0000, 0x8000_0000, 0x8000_1000);
        let mut tables = BootTables::<Sv39, 4>::new();
        let err = assemble::<Sv39, _>(&mut tables, &LOADER, &kernel).unwrap_err();
        assert_eq!(err, BootError::RegionOverlap { virt: VirtAddr::new(0x8000_0000) });
        assert_eq!(tables.valid_entries(FrameId(0)), 0);
    }

    #[test]
    fn test_identity_kernel_shares_loader_leaf() {
        let kernel = RegionDescriptor::new(0x8000_0000, 0x8100_0000, 0x8000_0000, 0x8000_1000);
        let mut tables = BootTables::<Sv39, 4>::new();
        let space = assemble::<Sv39, _>(&mut tables, &LOADER, &kernel).unwrap();
        assert_eq!(tables.valid_entries(space.self_map), 1);
    }

    #[test]
    fn test_console_reachable_after_activation() {
        let mut tables = BootTables::<Aarch64, 4>::new();
        let footprint = ARM_LOADER.with_console(UART);
        let space = assemble::<Aarch64, _>(&mut tables, &footprint, &scenario_a_kernel()).unwrap();

        let uart = VirtAddr::new(UART);
        assert_eq!(translate::<Aarch64, _>(&tables, space.self_map, uart), Some(PhysAddr::new(UART)));
        assert_eq!(
            tables.entry(space.self_map, 0, 0),
            Aarch64::decode(Aarch64::device_leaf(PhysAddr::new(0), 0), 0)
        );
        assert_eq!(
            tables.entry(space.self_map, 0, 1),
            Aarch64::decode(Aarch64::leaf(PhysAddr::new(0x4000_0000), 0), 0)
        );
        check_self_map::<Aarch64, _>(&tables, &space, PhysAddr::new(0x4008_0040)).unwrap();
    }

    #[test]
    fn test_console_inside_loader_leaf_is_not_remapped() {
        let mut tables = BootTables::<Sv39, 4>::new();
        let footprint = LOADER.with_console(0x8800_0000);
        let space = assemble::<Sv39, _>(&mut tables, &footprint, &scenario_a_kernel()).unwrap();
        assert_eq!(tables.valid_entries(space.self_map), 2);
    }

    #[test]
    fn test_invalid_kernel_descriptor() {
        let mut kernel = scenario_a_kernel();
        kernel.virt_entry = VirtAddr::new(KERNEL_VIRT + 0x0200_0000);
        let mut tables = BootTables::<Sv39, 4>::new();
        assert!(matches!(
            assemble::<Sv39, _>(&mut tables, &LOADER, &kernel),
            Err(BootError::InvalidRegion { .. })
        ));
        assert_eq!(tables.used(), 0);
    }

    #[test]
    fn test_self_map_miss_reported() {
        let mut tables = BootTables::<Sv39, 4>::new();
        let space = assemble::<Sv39, _>(&mut tables, &LOADER, &scenario_a_kernel()).unwrap();
        let outside = PhysAddr::new(0x4000_0000);
        assert_eq!(
            check_self_map::<Sv39, _>(&tables, &space, outside),
            Err(BootError::SelfMapMissing { addr: outside })
        );
    }

    #[test]
    fn test_footprint_contains() {
        assert!(LOADER.contains(PhysAddr::new(0x8020_0000)));
        assert!(!LOADER.contains(PhysAddr::new(0x8023_4000)));
    }
}
