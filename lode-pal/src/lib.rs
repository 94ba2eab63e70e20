//! Platform Abstraction Layer
//!
//! Firmware and board facing pieces of the loader: the early console, the
//! device tree queries, and the secondary core bring-up drivers (PSCI and
//! spin-table on AArch64, SBI HSM on RISC-V).

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod dtb;
pub mod psci;
pub mod sbi;
pub mod smp;
pub mod spin_table;

pub use dtb::DtbError;
pub use smp::{CpuRelease, DEFAULT_REGISTRY, DriverEntry, DriverNode, SmpDriver, SmpError, SmpRegistry};
