//! PSCI (Power State Coordination Interface) Driver
//!
//! Implements the `CPU_ON` part of ARM PSCI v0.2+ used to start secondary
//! cores. The conduit (SMC vs HVC) comes from the `method` property of the
//! device tree `/psci` node.
//!
//! Reference: ARM DEN0022D - Power State Coordination Interface

use core::sync::atomic::{AtomicU8, Ordering};

use lode_common::PhysAddr;

use crate::smp::{DriverNode, SmpDriver, SmpError};

// -- PSCI Function IDs (SMC64 convention for 64-bit calls)

/// Get PSCI version
const PSCI_VERSION: u32 = 0x8400_0000;

/// CPU_ON - Start a CPU at a given entry point
const CPU_ON_64: u32 = 0xC400_0003;

/// Compatible strings of PSCI nodes that provide `CPU_ON` at a fixed ID
pub const COMPATIBLE: &[&str] = &["arm,psci-0.2", "arm,psci-1.0"];

// -- PSCI Return Codes

/// PSCI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PsciError {
    /// Operation not supported
    NotSupported = -1,
    /// Invalid parameters
    InvalidParameters = -2,
    /// Operation denied
    Denied = -3,
    /// CPU already on
    AlreadyOn = -4,
    /// CPU on pending
    OnPending = -5,
    /// Internal failure
    InternalFailure = -6,
    /// CPU not present
    NotPresent = -7,
    /// CPU disabled
    Disabled = -8,
    /// Invalid address
    InvalidAddress = -9,
}

impl PsciError {
    /// Map a non-zero PSCI return value.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        match value as i32 {
            -1 => Self::NotSupported,
            -2 => Self::InvalidParameters,
            -3 => Self::Denied,
            -4 => Self::AlreadyOn,
            -5 => Self::OnPending,
            -7 => Self::NotPresent,
            -8 => Self::Disabled,
            -9 => Self::InvalidAddress,
            _ => Self::InternalFailure,
        }
    }
}

impl From<PsciError> for SmpError {
    fn from(err: PsciError) -> Self {
        SmpError { code: err as i64 }
    }
}

/// How PSCI calls reach the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Conduit {
    /// HVC to EL2 (QEMU, hypervisors)
    Hvc = 0,
    /// SMC to EL3 (TF-A)
    Smc = 1,
}

impl Conduit {
    /// Parse a device tree `method` property.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "hvc" => Some(Self::Hvc),
            "smc" => Some(Self::Smc),
            _ => None,
        }
    }
}

// -- PSCI Conduit Functions (SMC and HVC)

/// Issue a PSCI call via HVC (Hypervisor Call).
///
/// # Safety
/// This issues an HVC instruction.
#[cfg(target_arch = "aarch64")]
#[inline]
unsafe fn psci_call_hvc(func: u32, arg0: u64, arg1: u64, arg2: u64) -> i64 {
    let result: i64;
    // SAFETY: Caller guarantees the function ID and arguments are valid
    unsafe {
        core::arch::asm!(
            "hvc #0",
            inout("x0") func as u64 => result,
            inout("x1") arg0 => _,
            inout("x2") arg1 => _,
            inout("x3") arg2 => _,
            options(nomem, nostack)
        );
    }
    result
}

/// Issue a PSCI call via SMC (Secure Monitor Call).
///
/// # Safety
/// This issues an SMC instruction.
#[cfg(target_arch = "aarch64")]
#[inline]
unsafe fn psci_call_smc(func: u32, arg0: u64, arg1: u64, arg2: u64) -> i64 {
    let result: i64;
    // SAFETY: Caller guarantees the function ID and arguments are valid
    unsafe {
        core::arch::asm!(
            "smc #0",
            inout("x0") func as u64 => result,
            inout("x1") arg0 => _,
            inout("x2") arg1 => _,
            inout("x3") arg2 => _,
            options(nomem, nostack)
        );
    }
    result
}

/// PSCI firmware interface
pub struct Psci {
    conduit: AtomicU8,
}

/// The PSCI driver instance
pub static PSCI: Psci = Psci::new();

impl Psci {
    pub const fn new() -> Self {
        Self { conduit: AtomicU8::new(Conduit::Hvc as u8) }
    }

    /// The conduit selected by the last successful probe.
    #[must_use]
    pub fn conduit(&self) -> Conduit {
        if self.conduit.load(Ordering::Acquire) == Conduit::Smc as u8 {
            Conduit::Smc
        } else {
            Conduit::Hvc
        }
    }

    /// Issue a PSCI call using the configured conduit.
    ///
    /// # Safety
    /// The caller must ensure the function ID and arguments are valid.
    #[cfg(target_arch = "aarch64")]
    unsafe fn call(&self, func: u32, arg0: u64, arg1: u64, arg2: u64) -> i64 {
        match self.conduit() {
            Conduit::Smc => unsafe { psci_call_smc(func, arg0, arg1, arg2) },
            Conduit::Hvc => unsafe { psci_call_hvc(func, arg0, arg1, arg2) },
        }
    }

    #[cfg(not(target_arch = "aarch64"))]
    unsafe fn call(&self, _func: u32, _arg0: u64, _arg1: u64, _arg2: u64) -> i64 {
        PsciError::NotSupported as i64
    }

    /// Get the PSCI version supported by firmware as (major, minor).
    pub fn version(&self) -> (u16, u16) {
        // SAFETY: PSCI_VERSION is always safe to call
        let v = unsafe { self.call(PSCI_VERSION, 0, 0, 0) };
        if v < 0 {
            return (0, 0);
        }
        (((v >> 16) & 0xFFFF) as u16, (v & 0xFFFF) as u16)
    }
}

impl Default for Psci {
    fn default() -> Self {
        Self::new()
    }
}

impl SmpDriver for Psci {
    fn name(&self) -> &'static str {
        "psci"
    }

    fn probe(&self, node: &DriverNode<'_>) -> Result<(), SmpError> {
        let conduit = node
            .method
            .and_then(Conduit::from_method)
            .ok_or(SmpError::from(PsciError::InvalidParameters))?;
        self.conduit.store(conduit as u8, Ordering::Release);
        let (major, minor) = self.version();
        log::info!("PSCI {}.{} via {:?}", major, minor, conduit);
        Ok(())
    }

    unsafe fn start_core(&self, hw_id: u64, entry: PhysAddr, context: u64) -> Result<(), SmpError> {
        // SAFETY: Caller guarantees entry is valid executable code
        let result = unsafe { self.call(CPU_ON_64, hw_id, entry.as_u64(), context) };
        match result {
            0 => Ok(()),
            code => Err(PsciError::from_i64(code).into()),
        }
    }
}

/// Registry predicate for PSCI nodes.
#[must_use]
pub fn is_psci(compatible: &str) -> bool {
    COMPATIBLE.iter().any(|c| *c == compatible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_selects_conduit() {
        let psci = Psci::new();
        assert_eq!(psci.conduit(), Conduit::Hvc);

        psci.probe(&DriverNode { compatible: "arm,psci-1.0", method: Some("smc"), release: None }).unwrap();
        assert_eq!(psci.conduit(), Conduit::Smc);

        psci.probe(&DriverNode { compatible: "arm,psci-1.0", method: Some("hvc"), release: None }).unwrap();
        assert_eq!(psci.conduit(), Conduit::Hvc);
    }

    #[test]
    fn test_probe_requires_method() {
        let psci = Psci::new();
        let err = psci.probe(&DriverNode { compatible: "arm,psci-0.2", method: None, release: None });
        assert_eq!(err, Err(SmpError { code: -2 }));
        let err = psci.probe(&DriverNode { compatible: "arm,psci-0.2", method: Some("svc"), release: None });
        assert!(err.is_err());
    }

    #[test]
    fn test_compatible_predicate() {
        assert!(is_psci("arm,psci-0.2"));
        assert!(is_psci("arm,psci-1.0"));
        // PSCI 0.1 has no standard function IDs
        assert!(!is_psci("arm,psci"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PsciError::from_i64(-4), PsciError::AlreadyOn);
        assert_eq!(PsciError::from_i64(-42), PsciError::InternalFailure);
        assert_eq!(SmpError::from(PsciError::NotPresent).code, -7);
    }
}
