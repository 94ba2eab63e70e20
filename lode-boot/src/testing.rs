//! Host-side test doubles

extern crate std;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::vec::Vec;

use lode_arch::{Architecture, ENTRY_ARGS, TranslationRoot};
use lode_common::{BootError, LoadedImages, PhysAddr, RegionDescriptor, VirtAddr};
use lode_paging::arch::Sv39;
use lode_paging::{FrameId, TableStorage, translate};

use crate::assembler::Footprint;
use crate::images::ImageLoader;

pub const KERNEL_VIRT: u64 = 0xFFFF_FFFF_8000_0000;
pub const LOADER: Footprint = Footprint::new(0x8020_0000, 0x8023_4000);
pub const LOADER_PC: PhysAddr = PhysAddr::new(0x8020_0040);

/// Kernel at 0x8000_0000 linked at -2GB, 16MB, entry one page in.
pub fn scenario_a() -> LoadedImages {
    LoadedImages {
        kernel: RegionDescriptor::new(0x8000_0000, 0x8100_0000, KERNEL_VIRT, KERNEL_VIRT + 0x1000),
        user: RegionDescriptor::new(0x8200_0000, 0x8201_0000, 0x1_0000, 0x1_0040),
        num_apps: 1,
    }
}

/// Loader returning a fixed result.
pub struct FixedImages(pub LoadedImages);

impl ImageLoader for FixedImages {
    fn load_images(&mut self) -> Result<LoadedImages, BootError> {
        Ok(self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    FenceData,
    FenceInstructions,
    Publish(TranslationRoot),
    Jump(VirtAddr, [usize; ENTRY_ARGS]),
}

/// Reads Sv39 tables straight from their addresses, like the hardware
/// walker does.
struct PhysWalker;

impl TableStorage for PhysWalker {
    fn allocate(&mut self) -> Option<FrameId> {
        None
    }

    fn frames_available(&self) -> usize {
        0
    }

    fn frame_address(&self, frame: FrameId) -> PhysAddr {
        PhysAddr::new(frame.0 as u64)
    }

    fn frame_at(&self, pa: PhysAddr) -> Option<FrameId> {
        Some(FrameId(pa.as_u64() as usize))
    }

    fn read(&self, frame: FrameId, index: usize) -> u64 {
        // SAFETY: Frames come from live BootTables owned by the test
        unsafe { core::ptr::read_volatile((frame.0 as *const u64).add(index)) }
    }

    fn write(&mut self, _frame: FrameId, _index: usize, _raw: u64) {}
}

/// [`Architecture`] that records what the boot flow asks of it.
pub struct MockArch {
    events: Mutex<Vec<Event>>,
    publishes: AtomicUsize,
    resolve_pc: Option<PhysAddr>,
    resolved: Mutex<Vec<Option<PhysAddr>>>,
}

impl MockArch {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            publishes: AtomicUsize::new(0),
            resolve_pc: None,
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Resolve `pc` through the self-map root whenever a root is published.
    pub fn resolving(pc: PhysAddr) -> Self {
        Self { resolve_pc: Some(pc), ..Self::new() }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn jumps(&self) -> Vec<[usize; ENTRY_ARGS]> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Jump(_, args) => Some(args),
                _ => None,
            })
            .collect()
    }

    pub fn resolved(&self) -> Vec<Option<PhysAddr>> {
        self.resolved.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Architecture for MockArch {
    type Format = Sv39;

    fn fence_data(&self) {
        self.record(Event::FenceData);
    }

    fn fence_instructions(&self) {
        self.record(Event::FenceInstructions);
    }

    unsafe fn publish_translation_root(&self, root: TranslationRoot) {
        if let Some(pc) = self.resolve_pc {
            let root_frame = FrameId(root.self_map.as_u64() as usize);
            let pa = translate::<Sv39, _>(&PhysWalker, root_frame, VirtAddr::new(pc.as_u64()));
            self.resolved.lock().unwrap().push(pa);
        }
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.record(Event::Publish(root));
    }

    unsafe fn jump_to(&self, entry: VirtAddr, args: &[usize; ENTRY_ARGS]) {
        self.record(Event::Jump(entry, *args));
    }

    fn halt(&self) -> ! {
        panic!("core halted");
    }
}
