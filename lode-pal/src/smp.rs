//! Secondary core bring-up
//!
//! A bring-up driver starts one core at a physical entry point with a
//! single context word in its first argument register. Drivers are found
//! through a static registry keyed by device tree `compatible` strings.

use core::fmt;

use lode_common::{BootError, PhysAddr};

/// Failure reported by a bring-up driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmpError {
    /// Firmware status code
    pub code: i64,
}

impl fmt::Display for SmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bring-up failed with status {}", self.code)
    }
}

impl SmpError {
    /// Attach the core this error refers to.
    pub fn for_core(self, hw_id: u64) -> BootError {
        BootError::CoreStartFailed { hw_id, code: self.code }
    }
}

/// Release address of one spin-table core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuRelease {
    /// Hardware id from the cpu node's `reg`
    pub hw_id: u64,
    /// The node's `cpu-release-addr`
    pub addr: PhysAddr,
}

/// Properties of the device tree node a driver was matched against.
///
/// CPU nodes with an `enable-method` appear with that method as their
/// compatible string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverNode<'a> {
    /// The compatible string that matched
    pub compatible: &'a str,
    /// The node's `method` property, if any
    pub method: Option<&'a str>,
    /// Release address of a spin-table cpu node
    pub release: Option<CpuRelease>,
}

/// Platform mechanism that starts a secondary core.
pub trait SmpDriver: Sync {
    /// Driver name for diagnostics
    fn name(&self) -> &'static str;

    /// Configure the driver from its device tree node.
    ///
    /// Called for the node that selected the driver and again for every
    /// later node with the same compatible string.
    fn probe(&self, _node: &DriverNode<'_>) -> Result<(), SmpError> {
        Ok(())
    }

    /// Start core `hw_id` at physical address `entry` with `context` in its
    /// first argument register.
    ///
    /// # Safety
    ///
    /// `entry` must be the physical address of code able to run with the
    /// MMU off on a fresh core, and `context` must stay valid until that
    /// core has consumed it.
    unsafe fn start_core(&self, hw_id: u64, entry: PhysAddr, context: u64) -> Result<(), SmpError>;
}

/// One registry entry: a compatible predicate and the driver it selects.
pub struct DriverEntry {
    /// Returns true for compatible strings this driver handles
    pub matches: fn(&str) -> bool,
    /// The driver
    pub driver: &'static dyn SmpDriver,
}

/// Ordered list of bring-up drivers; the first match wins.
pub struct SmpRegistry {
    entries: &'static [DriverEntry],
}

impl SmpRegistry {
    pub const fn new(entries: &'static [DriverEntry]) -> Self {
        Self { entries }
    }

    /// Find the driver for a compatible string.
    #[must_use]
    pub fn lookup(&self, compatible: &str) -> Option<&'static dyn SmpDriver> {
        self.entries
            .iter()
            .find(|entry| (entry.matches)(compatible))
            .map(|entry| entry.driver)
    }

    /// Find and probe the driver for the first matching node.
    ///
    /// Nodes are tried in order; a node whose driver fails to probe is
    /// skipped. Once a driver is chosen, the remaining nodes with the same
    /// compatible string are probed too, so per-core properties reach it.
    pub fn resolve<'a, I>(&self, nodes: I) -> Option<&'static dyn SmpDriver>
    where
        I: IntoIterator<Item = DriverNode<'a>>,
    {
        let mut chosen: Option<(&'static dyn SmpDriver, &'a str)> = None;
        for node in nodes {
            if let Some((driver, compatible)) = chosen {
                if node.compatible == compatible {
                    if let Err(e) = driver.probe(&node) {
                        log::warn!("smp: {} rejected {}: {}", driver.name(), node.compatible, e);
                    }
                }
                continue;
            }
            let Some(driver) = self.lookup(node.compatible) else {
                continue;
            };
            match driver.probe(&node) {
                Ok(()) => {
                    log::debug!("smp: {} matched {}", driver.name(), node.compatible);
                    chosen = Some((driver, node.compatible));
                }
                Err(e) => log::warn!("smp: {} rejected {}: {}", driver.name(), node.compatible, e),
            }
        }
        chosen.map(|(driver, _)| driver)
    }

    /// Check whether any driver handles `compatible`.
    #[must_use]
    pub fn handles(&self, compatible: &str) -> bool {
        self.lookup(compatible).is_some()
    }
}

/// Drivers available on this architecture.
#[cfg(target_arch = "aarch64")]
pub static DEFAULT_REGISTRY: SmpRegistry = SmpRegistry::new(&[
    DriverEntry {
        matches: crate::psci::is_psci,
        driver: &crate::psci::PSCI,
    },
    DriverEntry {
        matches: crate::spin_table::is_spin_table,
        driver: &crate::spin_table::SPIN_TABLE,
    },
]);

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub static DEFAULT_REGISTRY: SmpRegistry = SmpRegistry::new(&[DriverEntry {
    matches: crate::sbi::is_riscv_cpu,
    driver: &crate::sbi::HSM,
}]);

#[cfg(not(any(target_arch = "aarch64", target_arch = "riscv32", target_arch = "riscv64")))]
pub static DEFAULT_REGISTRY: SmpRegistry = SmpRegistry::new(&[]);
