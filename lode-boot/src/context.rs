//! Boot context
//!
//! Owns everything the cores share during the boot: the table storage, the
//! rendezvous state, and the plan the primary core publishes once the
//! address space is built. All of it is written by the primary before the
//! rendezvous opens and only read afterwards.

use spin::Once;
use spin::mutex::SpinMutex;

use lode_arch::TranslationRoot;
use lode_common::{BootError, LoadedImages, PhysAddr};
use lode_paging::{BootTables, PagingFormat, log_tables};

use crate::assembler::{self, AddressSpace, Footprint};
use crate::handoff::DtbRegion;
use crate::images::ImageLoader;
use crate::rendezvous::Rendezvous;

/// What every core needs after the rendezvous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootPlan {
    pub images: LoadedImages,
    pub space: AddressSpace,
    pub root: TranslationRoot,
    pub dtb: DtbRegion,
}

/// Shared state of one boot with `FRAMES` table frames and up to `CORES`
/// cores.
pub struct BootContext<F: PagingFormat, const FRAMES: usize, const CORES: usize> {
    tables: SpinMutex<BootTables<F, FRAMES>>,
    plan: Once<BootPlan>,
    rendezvous: Rendezvous<CORES>,
}

impl<F: PagingFormat, const FRAMES: usize, const CORES: usize> BootContext<F, FRAMES, CORES> {
    pub const fn new() -> Self {
        Self {
            tables: SpinMutex::new(BootTables::new()),
            plan: Once::new(),
            rendezvous: Rendezvous::new(),
        }
    }

    /// Load the images and build the address space.
    ///
    /// Runs on the primary core only. The image count is checked before any
    /// table is touched. `pc` is an address of loader code that must be
    /// covered by the self-map.
    pub fn prepare<L: ImageLoader>(
        &self,
        loader: &mut L,
        footprint: Footprint,
        pc: PhysAddr,
        dtb: DtbRegion,
    ) -> Result<&BootPlan, BootError> {
        if let Some(plan) = self.plan.get() {
            return Ok(plan);
        }

        let images = loader.load_images()?;
        images.validate()?;

        let mut tables = self.tables.lock();
        let space = assembler::assemble::<F, _>(&mut *tables, &footprint, &images.kernel)?;
        assembler::check_self_map::<F, _>(&*tables, &space, pc)?;

        log_tables::<F, _>(&*tables, space.self_map, 0);
        if space.is_split() {
            log_tables::<F, _>(&*tables, space.kernel_map, 0);
        }
        log::info!(
            "{}: {} of {} table frames used",
            F::NAME,
            tables.used(),
            tables.capacity()
        );

        let root = space.translation_root(&*tables);
        Ok(self.plan.call_once(|| BootPlan { images, space, root, dtb }))
    }

    /// Open the rendezvous for `cores` participants.
    pub fn release(&self, cores: usize) {
        self.rendezvous.release(cores);
    }

    /// The published plan, once [`Self::prepare`] has succeeded.
    pub fn plan(&self) -> Option<&BootPlan> {
        self.plan.get()
    }

    /// Spin until the plan is published.
    pub fn wait_plan(&self) -> &BootPlan {
        self.plan.wait()
    }

    pub fn rendezvous(&self) -> &Rendezvous<CORES> {
        &self.rendezvous
    }

    /// Run `f` with read access to the table storage.
    pub fn with_tables<R>(&self, f: impl FnOnce(&BootTables<F, FRAMES>) -> R) -> R {
        f(&self.tables.lock())
    }
}

impl<F: PagingFormat, const FRAMES: usize, const CORES: usize> Default for BootContext<F, FRAMES, CORES> {
    fn default() -> Self {
        Self::new()
    }
}
