//! RISC-V SBI (Supervisor Binary Interface) calls
//!
//! Two extensions are used:
//! - HSM `hart_start` to start secondary harts
//! - the legacy `console_putchar` for early output
//!
//! Reference: RISC-V Supervisor Binary Interface Specification v1.0

use lode_common::PhysAddr;

use crate::smp::{DriverNode, SmpDriver, SmpError};

/// Hart State Management extension ID ("HSM")
const EID_HSM: usize = 0x0048_534D;
/// HSM `hart_start`
const FID_HART_START: usize = 0;
/// Legacy console putchar extension
const EID_CONSOLE_PUTCHAR: usize = 0x01;

/// SBI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(isize)]
pub enum SbiError {
    Failed = -1,
    NotSupported = -2,
    InvalidParam = -3,
    Denied = -4,
    InvalidAddress = -5,
    AlreadyAvailable = -6,
    AlreadyStarted = -7,
    AlreadyStopped = -8,
}

impl SbiError {
    /// Map a non-zero SBI return value.
    #[must_use]
    pub fn from_isize(value: isize) -> Self {
        match value {
            -2 => Self::NotSupported,
            -3 => Self::InvalidParam,
            -4 => Self::Denied,
            -5 => Self::InvalidAddress,
            -6 => Self::AlreadyAvailable,
            -7 => Self::AlreadyStarted,
            -8 => Self::AlreadyStopped,
            _ => Self::Failed,
        }
    }
}

impl From<SbiError> for SmpError {
    fn from(err: SbiError) -> Self {
        SmpError { code: err as i64 }
    }
}

/// Issue an SBI call. Returns `(error, value)`.
///
/// # Safety
/// The caller must ensure the extension, function and arguments are valid.
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
#[inline]
unsafe fn sbi_call(eid: usize, fid: usize, arg0: usize, arg1: usize, arg2: usize) -> (isize, usize) {
    let error: isize;
    let value: usize;
    // SAFETY: Caller guarantees the call is valid for the firmware
    unsafe {
        core::arch::asm!(
            "ecall",
            inlateout("a0") arg0 => error,
            inlateout("a1") arg1 => value,
            in("a2") arg2,
            in("a6") fid,
            in("a7") eid,
            options(nostack)
        );
    }
    (error, value)
}

#[cfg(not(any(target_arch = "riscv32", target_arch = "riscv64")))]
unsafe fn sbi_call(_eid: usize, _fid: usize, _arg0: usize, _arg1: usize, _arg2: usize) -> (isize, usize) {
    (SbiError::NotSupported as isize, 0)
}

/// Write one byte through the legacy SBI console.
pub fn console_putchar(c: u8) {
    // SAFETY: The legacy console call has no memory effects visible to us
    unsafe {
        sbi_call(EID_CONSOLE_PUTCHAR, 0, usize::from(c), 0, 0);
    }
}

/// HSM-based hart bring-up
pub struct Hsm;

/// The HSM driver instance
pub static HSM: Hsm = Hsm;

impl SmpDriver for Hsm {
    fn name(&self) -> &'static str {
        "sbi-hsm"
    }

    fn probe(&self, _node: &DriverNode<'_>) -> Result<(), SmpError> {
        Ok(())
    }

    unsafe fn start_core(&self, hw_id: u64, entry: PhysAddr, context: u64) -> Result<(), SmpError> {
        // SAFETY: Caller guarantees the entry point and context are valid
        let (error, _) = unsafe {
            sbi_call(
                EID_HSM,
                FID_HART_START,
                hw_id as usize,
                entry.as_u64() as usize,
                context as usize,
            )
        };
        match error {
            0 => Ok(()),
            code => Err(SbiError::from_isize(code).into()),
        }
    }
}

/// Registry predicate for RISC-V hart nodes.
///
/// Hart nodes carry a core-specific compatible followed by `"riscv"`.
#[must_use]
pub fn is_riscv_cpu(compatible: &str) -> bool {
    compatible == "riscv"
}
