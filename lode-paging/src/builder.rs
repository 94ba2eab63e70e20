//! Alignment-tier mapping policy
//!
//! A region is mapped in one of two tiers:
//!
//! 1. **Top**: leaves in the root table itself. Used when the virtual and
//!    physical bases are both aligned to the root granularity.
//! 2. **Intermediate**: leaves one level down, in a child table per root slot
//!    the region touches. Used when only the smaller granularity aligns.
//!
//! Mapping happens in two phases. [`PageTableBuilder::plan`] checks alignment,
//! range, storage and conflicts while only reading the tables, and
//! [`PageTableBuilder::apply`] performs the writes. A failed plan leaves every
//! table untouched.
//!
//! Child tables are fully populated before the parent entry that points at
//! them is written, so a table walk never observes a half-built child.

use core::marker::PhantomData;

use lode_common::{PhysAddr, VirtAddr};

use crate::format::{Entry, Memory, PagingFormat};
use crate::tables::FrameId;
use crate::traits::{MapError, TableStorage};

/// Leaf granularity chosen for a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Leaves in the root table
    Top,
    /// Leaves in a table one level below the root
    Intermediate,
}

impl Tier {
    /// Table level holding the leaves of this tier.
    #[inline]
    #[must_use]
    pub const fn level(self) -> usize {
        match self {
            Self::Top => 0,
            Self::Intermediate => 1,
        }
    }
}

/// Validated description of the writes a mapping needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingPlan {
    /// Tier the region is mapped with
    pub tier: Tier,
    /// First virtual address covered (aligned to the tier)
    pub virt: VirtAddr,
    /// First physical address covered (aligned to the tier)
    pub phys: PhysAddr,
    /// Number of leaves
    pub steps: u64,
    /// Bytes covered by each leaf
    pub granule: u64,
    /// Child tables that have to be allocated
    pub new_tables: usize,
    /// Memory type of the leaves
    pub memory: Memory,
}

impl MappingPlan {
    /// Total bytes the plan maps.
    #[inline]
    #[must_use]
    pub const fn span(&self) -> u64 {
        self.steps * self.granule
    }

    /// Whether the virtual ranges of two plans intersect.
    #[must_use]
    pub fn overlaps(&self, other: &MappingPlan) -> bool {
        let end = self.virt.as_u64() + (self.span() - 1);
        let other_end = other.virt.as_u64() + (other.span() - 1);
        self.virt.as_u64() <= other_end && other.virt.as_u64() <= end
    }

    /// Whether applying both plans would write different entries for the
    /// same virtual address.
    ///
    /// Overlapping plans of the same tier, memory type and phys -> virt
    /// offset write identical leaves and do not conflict.
    #[must_use]
    pub fn conflicts(&self, other: &MappingPlan) -> bool {
        let offset = |plan: &MappingPlan| plan.virt.as_u64().wrapping_sub(plan.phys.as_u64());
        self.overlaps(other)
            && (self.tier != other.tier || self.memory != other.memory || offset(self) != offset(other))
    }

    fn leaf<F: PagingFormat>(&self, step: u64, level: usize) -> u64 {
        let pa = self.phys.offset(step * self.granule);
        match self.memory {
            Memory::Normal => F::leaf(pa, level),
            Memory::Device => F::device_leaf(pa, level),
        }
    }
}

/// Builds mappings into a [`TableStorage`] for format `F`.
pub struct PageTableBuilder<'a, F: PagingFormat, S: TableStorage> {
    storage: &'a mut S,
    _format: PhantomData<fn() -> F>,
}

impl<'a, F: PagingFormat, S: TableStorage> PageTableBuilder<'a, F, S> {
    pub fn new(storage: &'a mut S) -> Self {
        Self {
            storage,
            _format: PhantomData,
        }
    }

    /// Borrow the underlying storage.
    #[must_use]
    pub fn storage(&self) -> &S {
        self.storage
    }

    /// Pick the largest tier both bases are aligned to.
    ///
    /// A tier whose leaves would sit in the last (4KB) level is never used,
    /// so two-level formats only have the top tier.
    #[must_use]
    pub fn select_tier(virt: VirtAddr, phys: PhysAddr) -> Option<Tier> {
        [Tier::Top, Tier::Intermediate]
            .into_iter()
            .filter(|tier| tier.level() + 1 < F::LEVELS)
            .find(|tier| {
                let shift = F::level_shift(tier.level());
                virt.is_aligned(shift) && phys.is_aligned(shift)
            })
    }

    /// Validate a mapping of `size` bytes of normal memory from `virt` to
    /// `phys` under `root`.
    ///
    /// The end of the region is not rounded: the plan covers exactly the
    /// leaves that intersect `[virt, virt + size)`.
    pub fn plan(
        &self,
        root: FrameId,
        virt: VirtAddr,
        phys: PhysAddr,
        size: u64,
    ) -> Result<MappingPlan, MapError> {
        self.plan_memory(root, virt, phys, size, Memory::Normal)
    }

    /// [`Self::plan`] with an explicit memory type.
    pub fn plan_memory(
        &self,
        root: FrameId,
        virt: VirtAddr,
        phys: PhysAddr,
        size: u64,
        memory: Memory,
    ) -> Result<MappingPlan, MapError> {
        if size == 0 {
            return Err(MapError::InvalidRange { virt, phys });
        }
        let tier = Self::select_tier(virt, phys).ok_or(MapError::Misaligned { virt, phys, size })?;
        let level = tier.level();
        let granule = F::level_size(level);
        let steps = size.div_ceil(granule);
        let span = steps
            .checked_mul(granule)
            .ok_or(MapError::InvalidRange { virt, phys })?;

        // Both ends must stay inside the address space and must not wrap
        // around the root table.
        let coverage = F::level_size(0) * F::entries() as u64;
        let last_virt = virt.as_u64().checked_add(span - 1);
        let last_phys = phys.as_u64().checked_add(span - 1);
        let (Some(last_virt), Some(_)) = (last_virt, last_phys) else {
            return Err(MapError::InvalidRange { virt, phys });
        };
        let last_virt = VirtAddr::new(last_virt);
        if span > coverage || F::index(last_virt, 0) < F::index(virt, 0) {
            return Err(MapError::InvalidRange { virt, phys });
        }

        let mut plan = MappingPlan {
            tier,
            virt,
            phys,
            steps,
            granule,
            new_tables: 0,
            memory,
        };

        match tier {
            Tier::Top => self.check_leaves(root, 0, &plan, 0, steps)?,
            Tier::Intermediate => {
                let mut step = 0;
                while step < steps {
                    let va = virt.offset(step * granule);
                    let in_slot = Self::steps_in_slot(va, steps - step);
                    let slot = F::index(va, 0);
                    match F::decode(self.storage.read(root, slot), 0) {
                        Entry::Invalid => plan.new_tables += 1,
                        Entry::NextLevel(child) => {
                            let child = self
                                .storage
                                .frame_at(child)
                                .ok_or(MapError::ForeignTable { virt: va })?;
                            self.check_leaves(child, 1, &plan, step, in_slot)?;
                        }
                        Entry::Leaf { .. } => return Err(MapError::Overlap { virt: va }),
                    }
                    step += in_slot;
                }
            }
        }

        if plan.new_tables > self.storage.frames_available() {
            return Err(MapError::StorageExhausted);
        }
        Ok(plan)
    }

    /// Perform the writes of a plan produced by [`Self::plan`] for `root`.
    pub fn apply(&mut self, root: FrameId, plan: &MappingPlan) -> Result<(), MapError> {
        match plan.tier {
            Tier::Top => {
                self.write_leaves(root, 0, plan, 0, plan.steps);
            }
            Tier::Intermediate => {
                let mut step = 0;
                while step < plan.steps {
                    let va = plan.virt.offset(step * plan.granule);
                    let in_slot = Self::steps_in_slot(va, plan.steps - step);
                    let slot = F::index(va, 0);

                    match F::decode(self.storage.read(root, slot), 0) {
                        Entry::NextLevel(child) => {
                            let child = self
                                .storage
                                .frame_at(child)
                                .ok_or(MapError::ForeignTable { virt: va })?;
                            self.write_leaves(child, 1, plan, step, in_slot);
                        }
                        Entry::Invalid => {
                            let child = self.storage.allocate().ok_or(MapError::StorageExhausted)?;
                            self.write_leaves(child, 1, plan, step, in_slot);
                            // Publish the child only once it is complete
                            let child_pa = self.storage.frame_address(child);
                            self.storage.write(root, slot, F::next_level(child_pa));
                        }
                        Entry::Leaf { .. } => return Err(MapError::Overlap { virt: va }),
                    }
                    step += in_slot;
                }
            }
        }
        Ok(())
    }

    /// Plan and apply a mapping.
    pub fn map(
        &mut self,
        root: FrameId,
        virt: VirtAddr,
        phys: PhysAddr,
        size: u64,
    ) -> Result<MappingPlan, MapError> {
        let plan = self.plan(root, virt, phys, size)?;
        log::debug!(
            "{}: map {} -> {} {:?} x{} ({:#x} bytes each)",
            F::NAME,
            plan.virt,
            plan.phys,
            plan.tier,
            plan.steps,
            plan.granule
        );
        self.apply(root, &plan)?;
        Ok(plan)
    }

    /// Plan an identity map of `[start, end)` rounded outward to the top
    /// tier.
    pub fn plan_identity(
        &self,
        root: FrameId,
        start: PhysAddr,
        end: PhysAddr,
        memory: Memory,
    ) -> Result<MappingPlan, MapError> {
        let shift = F::level_shift(0);
        let base = start.align_down(shift);
        let limit = end.align_up(shift);
        if limit <= base {
            return Err(MapError::InvalidRange {
                virt: VirtAddr::new(start.as_u64()),
                phys: start,
            });
        }
        self.plan_memory(
            root,
            VirtAddr::new(base.as_u64()),
            base,
            limit.as_u64() - base.as_u64(),
            memory,
        )
    }

    /// Identity-map `[start, end)` rounded outward to the top tier.
    pub fn map_identity(
        &mut self,
        root: FrameId,
        start: PhysAddr,
        end: PhysAddr,
    ) -> Result<MappingPlan, MapError> {
        let plan = self.plan_identity(root, start, end, Memory::Normal)?;
        self.apply(root, &plan)?;
        Ok(plan)
    }

    /// Leaves of an intermediate plan that fall in the root slot of `va`.
    fn steps_in_slot(va: VirtAddr, remaining: u64) -> u64 {
        let left = (F::entries() - F::index(va, 1)) as u64;
        remaining.min(left)
    }

    fn check_leaves(
        &self,
        table: FrameId,
        level: usize,
        plan: &MappingPlan,
        first: u64,
        count: u64,
    ) -> Result<(), MapError> {
        for step in first..first + count {
            let va = plan.virt.offset(step * plan.granule);
            let wanted = plan.leaf::<F>(step, level);
            let existing = self.storage.read(table, F::index(va, level));
            if existing != 0 && existing != wanted {
                return Err(MapError::Overlap { virt: va });
            }
        }
        Ok(())
    }

    fn write_leaves(&mut self, table: FrameId, level: usize, plan: &MappingPlan, first: u64, count: u64) {
        for step in first..first + count {
            let va = plan.virt.offset(step * plan.granule);
            self.storage.write(table, F::index(va, level), plan.leaf::<F>(step, level));
        }
    }
}
