//! Primary and secondary boot flows
//!
//! Primary: load images, build the address space, start the secondaries,
//! open the rendezvous, then run the per-core tail. Secondary: run the
//! per-core tail with the identity from its wake-up block.
//!
//! The per-core tail is rendezvous, activation and handoff. It only returns
//! if the kernel does.

use lode_arch::Architecture;
use lode_common::{BootError, CoreIdentity, PhysAddr, SecondaryWakeup};

use crate::activation::activate;
use crate::assembler::Footprint;
use crate::context::BootContext;
use crate::cores::{CoreStacks, WakeupTable, start_secondaries};
use crate::handoff::{HandoffArgs, enter_kernel};
use crate::images::ImageLoader;
use crate::platform::Platform;

/// Where secondaries start and what they start with.
pub struct Bringup<'a, const CORES: usize, const STACK: usize> {
    /// Physical address of the secondary entry stub
    pub entry: PhysAddr,
    pub stacks: &'a CoreStacks<STACK, CORES>,
    pub wakeups: &'a WakeupTable<CORES>,
}

/// The loader image as seen by the primary core.
#[derive(Clone, Copy, Debug)]
pub struct LoaderImage {
    pub footprint: Footprint,
    /// Address of code that runs across activation
    pub pc: PhysAddr,
}

/// Primary-only part of the boot, up to opening the rendezvous.
pub fn prepare_primary<A, L, const FRAMES: usize, const CORES: usize, const STACK: usize>(
    arch: &A,
    ctx: &BootContext<A::Format, FRAMES, CORES>,
    loader: &mut L,
    image: LoaderImage,
    platform: &Platform<CORES>,
    bringup: &Bringup<'_, CORES, STACK>,
) -> Result<(), BootError>
where
    A: Architecture,
    L: ImageLoader,
{
    ctx.prepare(loader, image.footprint, image.pc, platform.dtb)?;

    let cores = &platform.cores;
    if cores.count() > 1 {
        let driver = platform.driver.ok_or(BootError::NoSmpDriver)?;
        let context = ctx as *const BootContext<A::Format, FRAMES, CORES> as usize as u64;
        start_secondaries(arch, driver, cores, bringup.entry, bringup.stacks, bringup.wakeups, context)?;
    }

    log::info!("releasing {} core(s)", cores.count());
    ctx.release(cores.count());
    Ok(())
}

/// Rendezvous, activate and enter the kernel as `core`.
pub fn run_core<A: Architecture, const FRAMES: usize, const CORES: usize>(
    arch: &A,
    ctx: &BootContext<A::Format, FRAMES, CORES>,
    core: CoreIdentity,
) -> BootError {
    ctx.rendezvous().enter(core.logical_id, || arch.spin_hint());
    let plan = ctx.wait_plan();

    // SAFETY: The plan's self-map covers the loader, and the tables are no
    // longer written once the rendezvous has opened.
    let vm = unsafe { activate(arch, plan.root) };
    let args = HandoffArgs::new(&plan.images.user, plan.dtb, core);
    // SAFETY: The kernel window of the active translation maps the entry.
    unsafe { enter_kernel(&vm, &plan.images.kernel, &args) }
}

/// Full primary flow. Only returns on failure.
pub fn primary<A, L, const FRAMES: usize, const CORES: usize, const STACK: usize>(
    arch: &A,
    ctx: &BootContext<A::Format, FRAMES, CORES>,
    loader: &mut L,
    image: LoaderImage,
    platform: &Platform<CORES>,
    bringup: &Bringup<'_, CORES, STACK>,
) -> BootError
where
    A: Architecture,
    L: ImageLoader,
{
    if let Err(err) = prepare_primary(arch, ctx, loader, image, platform, bringup) {
        return err;
    }
    run_core(arch, ctx, platform.cores.primary())
}

/// Secondary flow for the core owning `wakeup`. Only returns on failure.
///
/// # Safety
///
/// `wakeup.context` must be the address of the `BootContext` the primary
/// passed to [`prepare_primary`].
pub unsafe fn secondary<A: Architecture, const FRAMES: usize, const CORES: usize>(
    arch: &A,
    wakeup: &SecondaryWakeup,
) -> BootError {
    // SAFETY: Caller guarantees the context address
    let ctx = unsafe { &*(wakeup.context as usize as *const BootContext<A::Format, FRAMES, CORES>) };
    run_core(arch, ctx, wakeup.identity())
}

/// Report `err` and stop this core.
pub fn fatal<A: Architecture>(arch: &A, err: BootError) -> ! {
    log::error!("boot failed: {}", err);
    arch.halt()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::boxed::Box;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use std::vec::Vec;

    use super::*;
    use crate::cores::CoreMap;
    use crate::cores::tests::FakeDriver;
    use crate::handoff::DtbRegion;
    use crate::testing::{Event, FixedImages, LOADER, LOADER_PC, MockArch, scenario_a};
    use lode_common::VirtAddr;
    use lode_paging::arch::Sv39;

    type Context = BootContext<Sv39, 4, 4>;

    const IMAGE: LoaderImage = LoaderImage { footprint: LOADER, pc: LOADER_PC };
    const DTB: DtbRegion = DtbRegion { phys: PhysAddr::new(0x8700_0000), size: 0x1800 };

    fn bringup<'a>(stacks: &'a CoreStacks<64, 4>, wakeups: &'a WakeupTable<4>) -> Bringup<'a, 4, 64> {
        Bringup { entry: PhysAddr::new(0x8020_0080), stacks, wakeups }
    }

    #[test]
    fn test_scenario_a_single_core() {
        let arch = MockArch::resolving(LOADER_PC);
        let ctx = Context::new();
        let platform = Platform::<4>::single(0, DTB);
        let (stacks, wakeups) = (CoreStacks::new(), WakeupTable::new());

        let err = primary(&arch, &ctx, &mut FixedImages(scenario_a()), IMAGE, &platform, &bringup(&stacks, &wakeups));
        assert_eq!(err, BootError::UnexpectedReturn { entry: VirtAddr::new(0xFFFF_FFFF_8000_1000) });

        let plan = ctx.plan().unwrap();
        let events = arch.events();
        assert_eq!(events[..3], [Event::FenceData, Event::Publish(plan.root), Event::FenceInstructions]);

        let user = scenario_a().user;
        let jumps = arch.jumps();
        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0][..6], [
            0x8200_0000,
            0x8201_0000,
            user.phys_virt_offset as usize,
            0x1_0040,
            0x8700_0000,
            0x1800,
        ]);

        // The loader's code resolves to itself through the published root
        assert_eq!(arch.resolved(), [Some(LOADER_PC)]);
    }

    #[test]
    fn test_scenario_b_no_user_image() {
        let arch = MockArch::new();
        let ctx = Context::new();
        let platform = Platform::<4>::single(0, DtbRegion::NONE);
        let (stacks, wakeups) = (CoreStacks::new(), WakeupTable::new());
        let mut images = scenario_a();
        images.num_apps = 0;

        let err = primary(&arch, &ctx, &mut FixedImages(images), IMAGE, &platform, &bringup(&stacks, &wakeups));
        assert_eq!(err, BootError::NoUserImage { found: 0 });
        assert!(arch.events().is_empty());
        ctx.with_tables(|t| assert_eq!(t.used(), 0));
        assert!(!ctx.rendezvous().is_released());
    }

    #[test]
    fn test_missing_driver_is_fatal() {
        let arch = MockArch::new();
        let ctx = Context::new();
        let platform = Platform::<4> {
            dtb: DtbRegion::NONE,
            cores: CoreMap::assign(0, &[0, 1]).unwrap(),
            driver: None,
        };
        let (stacks, wakeups) = (CoreStacks::new(), WakeupTable::new());
        let err = prepare_primary(&arch, &ctx, &mut FixedImages(scenario_a()), IMAGE, &platform, &bringup(&stacks, &wakeups));
        assert_eq!(err, Err(BootError::NoSmpDriver));
        assert!(!ctx.rendezvous().is_released());
    }

    #[test]
    fn test_scenario_c_missing_core_blocks_activation() {
        let arch = Arc::new(MockArch::new());
        let ctx: &'static Context = Box::leak(Box::new(Context::new()));
        let stacks: &'static CoreStacks<64, 4> = Box::leak(Box::new(CoreStacks::new()));
        let wakeups: &'static WakeupTable<4> = Box::leak(Box::new(WakeupTable::new()));
        let driver = FakeDriver::leaked(None);
        let platform = Platform::<4> {
            dtb: DTB,
            cores: CoreMap::assign(0x10, &[0x10, 0x11, 0x12, 0x13]).unwrap(),
            driver: Some(driver),
        };

        prepare_primary(&*arch, ctx, &mut FixedImages(scenario_a()), IMAGE, &platform, &bringup(stacks, wakeups))
            .unwrap();
        assert_eq!(driver.started.lock().unwrap().len(), 3);
        assert!(ctx.rendezvous().is_released());

        // Core 2 never arrives. The secondaries find their identity and the
        // context through their wake-up blocks.
        let mut handles = Vec::new();
        let primary_arch = Arc::clone(&arch);
        handles.push(thread::spawn(move || run_core(&*primary_arch, ctx, CoreIdentity::primary(0x10))));
        for logical in [1usize, 3] {
            let arch = Arc::clone(&arch);
            let wakeup = wakeups.get(logical).unwrap();
            // SAFETY: The context address was written by prepare_primary
            handles.push(thread::spawn(move || unsafe { secondary::<MockArch, 4, 4>(&*arch, &wakeup) }));
        }

        while ctx.rendezvous().ready_count() < 3 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(arch.publishes(), 0);
        assert!(arch.jumps().is_empty());

        // Unblock the survivors so the threads can be joined
        ctx.rendezvous().arrive(2);
        for h in handles {
            assert!(matches!(h.join().unwrap(), BootError::UnexpectedReturn { .. }));
        }
        assert_eq!(arch.publishes(), 3);

        let mut ids: Vec<_> = arch.jumps().iter().map(|regs| (regs[6], regs[7])).collect();
        ids.sort_unstable();
        if cfg!(feature = "smp") {
            assert_eq!(ids, [(0x10, 0), (0x11, 1), (0x13, 3)]);
        }
    }

    #[test]
    #[should_panic(expected = "core halted")]
    fn test_fatal_halts() {
        let arch = MockArch::new();
        fatal(&arch, BootError::NoSmpDriver);
    }
}
