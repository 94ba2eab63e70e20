//! Loader Configuration Constants
//!
//! Everything here is fixed at build time; the loader has no runtime
//! configuration beyond what the device tree reports.

use log::LevelFilter;

/// Maximum number of cores the loader brings up
#[cfg(feature = "smp")]
pub const MAX_CORES: usize = 8;

/// Maximum number of cores the loader brings up
#[cfg(not(feature = "smp"))]
pub const MAX_CORES: usize = 1;

/// Number of 4KB frames in the static table storage.
///
/// Roots for the self-map and kernel map (two on split-root formats) plus
/// one child per root slot a fallback-tier mapping touches.
pub const TABLE_FRAMES: usize = 8;

/// Size of each per-core loader stack
pub const CORE_STACK_SIZE: usize = 16 * 1024; // 16 KB per core

/// PL011 base address used for the console on AArch64 (QEMU virt)
pub const UART_BASE: u64 = 0x0900_0000;

/// Largest device tree blob the loader will accept
pub const DTB_MAX_SIZE: usize = 2 * 1024 * 1024; // 2MB

/// Bytes formatted per log record before truncation
pub const LOG_LINE_SIZE: usize = 256;

/// Log level of the boot console
pub const LOG_LEVEL: LevelFilter = if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

const _: () = assert!(MAX_CORES >= 1, "at least the primary core is required");
const _: () = assert!(TABLE_FRAMES >= 2, "split-root formats need two roots");
const _: () = assert!(CORE_STACK_SIZE.is_multiple_of(4096), "stacks must be page sized");
const _: () = assert!(DTB_MAX_SIZE.is_multiple_of(4096));
