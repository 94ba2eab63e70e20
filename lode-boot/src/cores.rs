//! Core identities, boot stacks and secondary start-up
//!
//! The primary core numbers the cores (itself 0, the others in device tree
//! order), gives each secondary a stack and a wake-up block, and asks the
//! bring-up driver to start it at the secondary entry stub.

use core::cell::UnsafeCell;

use spin::mutex::SpinMutex;

use lode_arch::Architecture;
use lode_common::{BootError, CoreIdentity, PhysAddr, SecondaryWakeup};
use lode_pal::SmpDriver;

/// Dense numbering of up to `N` cores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreMap<const N: usize> {
    cores: [CoreIdentity; N],
    count: usize,
}

impl<const N: usize> CoreMap<N> {
    /// Only the primary core.
    pub const fn single(primary_hw: u64) -> Self {
        let mut cores = [CoreIdentity { hw_id: 0, logical_id: 0 }; N];
        cores[0] = CoreIdentity::primary(primary_hw);
        Self { cores, count: 1 }
    }

    /// Number the cores in `hw_ids`, with the primary first.
    ///
    /// The primary does not have to appear in `hw_ids`.
    pub fn assign(primary_hw: u64, hw_ids: &[u64]) -> Result<Self, BootError> {
        let found = hw_ids.iter().filter(|&&hw| hw != primary_hw).count() + 1;
        if found > N {
            return Err(BootError::TooManyCores { found, max: N });
        }

        let mut map = Self::single(primary_hw);
        for &hw_id in hw_ids.iter().filter(|&&hw| hw != primary_hw) {
            map.cores[map.count] = CoreIdentity { hw_id, logical_id: map.count };
            map.count += 1;
        }
        Ok(map)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn primary(&self) -> CoreIdentity {
        self.cores[0]
    }

    pub fn as_slice(&self) -> &[CoreIdentity] {
        &self.cores[..self.count]
    }

    pub fn secondaries(&self) -> impl Iterator<Item = CoreIdentity> + '_ {
        self.as_slice().iter().copied().skip(1)
    }
}

/// `N` boot stacks of `SIZE` bytes, one per logical core.
///
/// Only ever accessed through the stack pointer; Rust code just computes
/// their addresses.
#[repr(C, align(16))]
pub struct CoreStacks<const SIZE: usize, const N: usize> {
    stacks: UnsafeCell<[[u8; SIZE]; N]>,
}

// SAFETY: Rust never reads or writes the stack memory through this type.
unsafe impl<const SIZE: usize, const N: usize> Sync for CoreStacks<SIZE, N> {}

impl<const SIZE: usize, const N: usize> CoreStacks<SIZE, N> {
    pub const fn new() -> Self {
        Self {
            stacks: UnsafeCell::new([[0; SIZE]; N]),
        }
    }

    /// Initial stack pointer of core `logical_id`.
    pub fn top(&self, logical_id: usize) -> Option<u64> {
        (logical_id < N).then(|| self.stacks.get() as usize as u64 + ((logical_id + 1) * SIZE) as u64)
    }
}

impl<const SIZE: usize, const N: usize> Default for CoreStacks<SIZE, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wake-up blocks of the secondaries, indexed by logical id.
pub struct WakeupTable<const N: usize> {
    slots: SpinMutex<[SecondaryWakeup; N]>,
}

impl<const N: usize> WakeupTable<N> {
    pub const fn new() -> Self {
        Self {
            slots: SpinMutex::new(
                [SecondaryWakeup { stack_top: 0, hw_id: 0, logical_id: 0, context: 0 }; N],
            ),
        }
    }

    /// Store the wake-up block of core `logical_id` and return its address.
    pub fn fill(&self, logical_id: usize, wakeup: SecondaryWakeup) -> Option<u64> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(logical_id)?;
        *slot = wakeup;
        Some(slot as *const SecondaryWakeup as usize as u64)
    }

    pub fn get(&self, logical_id: usize) -> Option<SecondaryWakeup> {
        self.slots.lock().get(logical_id).copied()
    }
}

impl<const N: usize> Default for WakeupTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Start every secondary in `cores` at `entry`.
///
/// Each core gets its wake-up block's address as its start-up argument.
/// `context` is the address of the shared boot context.
pub fn start_secondaries<A: Architecture, const N: usize, const SIZE: usize>(
    arch: &A,
    driver: &dyn SmpDriver,
    cores: &CoreMap<N>,
    entry: PhysAddr,
    stacks: &CoreStacks<SIZE, N>,
    wakeups: &WakeupTable<N>,
    context: u64,
) -> Result<(), BootError> {
    let max = N;
    for core in cores.secondaries() {
        let too_many = BootError::TooManyCores { found: cores.count(), max };
        let stack_top = stacks.top(core.logical_id).ok_or(too_many)?;
        let wakeup = SecondaryWakeup {
            stack_top,
            hw_id: core.hw_id,
            logical_id: core.logical_id as u64,
            context,
        };
        let block = wakeups.fill(core.logical_id, wakeup).ok_or(too_many)?;

        // The new core reads its block with caches and translation off
        arch.fence_data();

        log::debug!(
            "{}: starting core {} (hw {:#x}) stack {:#x}",
            driver.name(),
            core.logical_id,
            core.hw_id,
            stack_top
        );
        // SAFETY: `entry` is the secondary entry stub and the block stays
        // valid for the rest of the boot.
        unsafe { driver.start_core(core.hw_id, entry, block) }.map_err(|e| e.for_core(core.hw_id))?;
    }
    if cores.count() > 1 {
        log::info!("{}: started {} secondary core(s)", driver.name(), cores.count() - 1);
    }
    Ok(())
}
