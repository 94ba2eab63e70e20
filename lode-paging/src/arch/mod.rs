//! Hardware table formats

pub mod arm64;
pub mod riscv;

pub use arm64::Aarch64;
pub use riscv::{Sv32, Sv39, Sv48};
