//! Spin-table secondary bring-up
//!
//! Firmware parks each secondary core in a loop polling its
//! `cpu-release-addr`. Writing an address there (and signalling an event)
//! releases the core, which jumps to it with no arguments.
//!
//! Released cores therefore enter through a trampoline that collects the
//! real entry point and context word from a shared mailbox. Cores are
//! released one at a time: the next release waits until the previous core
//! has emptied the mailbox.

use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::mutex::SpinMutex;

use lode_common::PhysAddr;

use crate::smp::{CpuRelease, DriverNode, SmpDriver, SmpError};

/// Enable method handled by this driver
pub const ENABLE_METHOD: &str = "spin-table";

/// Cores the driver can hold release addresses for
pub const MAX_RELEASES: usize = 16;

/// No release address is known for the core
pub const ERR_NO_RELEASE: i64 = -7;
/// The cpu node lacks a usable `cpu-release-addr`
pub const ERR_INVALID_NODE: i64 = -2;
/// More spin-table cores than [`MAX_RELEASES`]
pub const ERR_TABLE_FULL: i64 = -4;

/// Entry and context handed to the next released core.
///
/// The layout is read by the trampoline: entry at offset 0, context at 8.
/// A zero context marks the mailbox as empty.
#[repr(C)]
pub struct Mailbox {
    entry: AtomicU64,
    context: AtomicU64,
}

impl Mailbox {
    const fn new() -> Self {
        Self {
            entry: AtomicU64::new(0),
            context: AtomicU64::new(0),
        }
    }

    fn is_empty(&self) -> bool {
        self.context.load(Ordering::Acquire) == 0
    }

    fn post(&self, entry: PhysAddr, context: u64) {
        self.entry.store(entry.as_u64(), Ordering::Relaxed);
        self.context.store(context, Ordering::Release);
    }
}

static MAILBOX: Mailbox = Mailbox::new();

/// Wait for a posted context, take the entry, empty the mailbox and jump
/// with the context in `x0`.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
    core::arch::naked_asm!(
        "adrp x1, {mailbox}",
        "add x1, x1, :lo12:{mailbox}",
        "1:",
        "ldar x0, [x1, #8]",
        "cbz x0, 1b",
        "ldr x2, [x1]",
        "stlr xzr, [x1, #8]",
        "br x2",
        mailbox = sym MAILBOX,
    )
}

#[cfg(not(target_arch = "aarch64"))]
unsafe extern "C" fn trampoline() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Address written to a core's release slot.
#[must_use]
pub fn trampoline_address() -> u64 {
    let f: unsafe extern "C" fn() -> ! = trampoline;
    f as usize as u64
}

/// Make the release write visible and wake cores sleeping in `wfe`.
#[inline]
fn signal() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: Barrier and event instructions have no memory effects beyond
    // ordering.
    unsafe {
        core::arch::asm!("dsb sy", "sev", options(nostack));
    }
    #[cfg(not(target_arch = "aarch64"))]
    core::sync::atomic::fence(Ordering::SeqCst);
}

/// Spin-table bring-up driver
pub struct SpinTable {
    releases: SpinMutex<[Option<CpuRelease>; MAX_RELEASES]>,
}

/// The spin-table driver instance
pub static SPIN_TABLE: SpinTable = SpinTable::new();

impl SpinTable {
    pub const fn new() -> Self {
        Self { releases: SpinMutex::new([None; MAX_RELEASES]) }
    }

    /// Release address recorded for `hw_id`.
    #[must_use]
    pub fn release_addr(&self, hw_id: u64) -> Option<PhysAddr> {
        self.releases
            .lock()
            .iter()
            .flatten()
            .find(|release| release.hw_id == hw_id)
            .map(|release| release.addr)
    }

    fn record(&self, release: CpuRelease) -> Result<(), SmpError> {
        let mut releases = self.releases.lock();
        let slot = releases
            .iter()
            .position(|slot| slot.is_none_or(|r| r.hw_id == release.hw_id))
            .ok_or(SmpError { code: ERR_TABLE_FULL })?;
        releases[slot] = Some(release);
        Ok(())
    }
}

impl Default for SpinTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SmpDriver for SpinTable {
    fn name(&self) -> &'static str {
        "spin-table"
    }

    fn probe(&self, node: &DriverNode<'_>) -> Result<(), SmpError> {
        let release = node.release.ok_or(SmpError { code: ERR_INVALID_NODE })?;
        if release.addr.as_u64() == 0 || release.addr.as_u64() % 8 != 0 {
            return Err(SmpError { code: ERR_INVALID_NODE });
        }
        self.record(release)?;
        log::debug!("spin-table: core {:#x} released at {}", release.hw_id, release.addr);
        Ok(())
    }

    unsafe fn start_core(&self, hw_id: u64, entry: PhysAddr, context: u64) -> Result<(), SmpError> {
        let addr = self.release_addr(hw_id).ok_or(SmpError { code: ERR_NO_RELEASE })?;
        if context == 0 {
            return Err(SmpError { code: ERR_INVALID_NODE });
        }

        while !MAILBOX.is_empty() {
            core::hint::spin_loop();
        }
        MAILBOX.post(entry, context);

        // SAFETY: The release address comes from the device tree and is
        // identity mapped while the loader runs with translation off.
        unsafe { ptr::write_volatile(addr.as_u64() as usize as *mut u64, trampoline_address()) };
        signal();
        Ok(())
    }
}

/// Registry predicate for spin-table cpu nodes.
#[must_use]
pub fn is_spin_table(compatible: &str) -> bool {
    compatible == ENABLE_METHOD
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::dtb::tests::FdtBuilder;
    use crate::dtb::{driver_nodes, from_slice};
    use crate::smp::{DriverEntry, SmpRegistry};

    static RELEASE: [AtomicU64; 2] = [AtomicU64::new(0), AtomicU64::new(0)];

    fn release_slot(i: usize) -> u64 {
        &RELEASE[i] as *const AtomicU64 as usize as u64
    }

    fn spin_table_tree() -> Vec<u8> {
        let mut b = FdtBuilder::new();
        b.begin("")
            .prop_u32("#address-cells", &[2])
            .prop_u32("#size-cells", &[2])
            .begin("cpus")
            .prop_u32("#address-cells", &[1])
            .prop_u32("#size-cells", &[0]);
        for (cpu, slot) in [(0u32, 0usize), (1, 1)] {
            let addr = release_slot(slot);
            b.begin(&std::format!("cpu@{cpu}"))
                .prop_strs("device_type", &["cpu"])
                .prop_strs("compatible", &["arm,cortex-a72"])
                .prop_u32("reg", &[cpu])
                .prop_strs("enable-method", &[ENABLE_METHOD])
                .prop_u32("cpu-release-addr", &[(addr >> 32) as u32, addr as u32])
                .end();
        }
        b.begin("cpu@2")
            .prop_u32("reg", &[2])
            .prop_strs("enable-method", &["psci"])
            .end();
        b.end().end();
        b.finish()
    }

    #[test]
    fn test_release_through_mailbox() {
        static DRIVER: SpinTable = SpinTable::new();
        static REGISTRY: SmpRegistry = SmpRegistry::new(&[DriverEntry {
            matches: is_spin_table,
            driver: &DRIVER,
        }]);

        let blob = spin_table_tree();
        let fdt = from_slice(&blob).unwrap();
        let driver = REGISTRY.resolve(driver_nodes(&fdt)).unwrap();
        assert_eq!(driver.name(), "spin-table");
        assert_eq!(DRIVER.release_addr(0), Some(PhysAddr::new(release_slot(0))));
        assert_eq!(DRIVER.release_addr(1), Some(PhysAddr::new(release_slot(1))));
        assert_eq!(DRIVER.release_addr(2), None);

        let entry = PhysAddr::new(0x4008_0000);
        // SAFETY: The release slot is a test static
        unsafe { driver.start_core(1, entry, 0xC0FFEE) }.unwrap();
        assert_eq!(RELEASE[1].load(Ordering::Relaxed), trampoline_address());
        assert_eq!(RELEASE[0].load(Ordering::Relaxed), 0);
        assert_eq!(MAILBOX.entry.load(Ordering::Relaxed), entry.as_u64());
        assert_eq!(MAILBOX.context.load(Ordering::Relaxed), 0xC0FFEE);

        // A core without a release address is refused before the mailbox
        // is touched
        let err = unsafe { driver.start_core(2, entry, 0xBEEF) }.unwrap_err();
        assert_eq!(err.code, ERR_NO_RELEASE);

        // The released core empties the mailbox; the next release proceeds
        MAILBOX.context.store(0, Ordering::Release);
        // SAFETY: As above
        unsafe { driver.start_core(0, entry, 0xD00D) }.unwrap();
        assert_eq!(RELEASE[0].load(Ordering::Relaxed), trampoline_address());
        assert_eq!(MAILBOX.context.load(Ordering::Relaxed), 0xD00D);
    }

    #[test]
    fn test_probe_requires_release_address() {
        let driver = SpinTable::new();
        let node = DriverNode { compatible: ENABLE_METHOD, method: None, release: None };
        assert_eq!(driver.probe(&node), Err(SmpError { code: ERR_INVALID_NODE }));

        let unaligned = DriverNode {
            release: Some(CpuRelease { hw_id: 1, addr: PhysAddr::new(0xd9) }),
            ..node
        };
        assert_eq!(driver.probe(&unaligned), Err(SmpError { code: ERR_INVALID_NODE }));
    }

    #[test]
    fn test_release_table_full() {
        let driver = SpinTable::new();
        for hw_id in 0..MAX_RELEASES as u64 {
            let release = CpuRelease { hw_id, addr: PhysAddr::new(0xd8 + hw_id * 8) };
            driver.record(release).unwrap();
        }
        // A known core's entry is replaced
        driver.record(CpuRelease { hw_id: 3, addr: PhysAddr::new(0x1000) }).unwrap();
        assert_eq!(driver.release_addr(3), Some(PhysAddr::new(0x1000)));

        let extra = CpuRelease { hw_id: 99, addr: PhysAddr::new(0x2000) };
        assert_eq!(driver.record(extra), Err(SmpError { code: ERR_TABLE_FULL }));
    }
}
