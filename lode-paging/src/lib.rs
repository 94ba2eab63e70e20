//! Paging - Boot-time page table construction
//!
//! This crate builds the translation tables a boot loader needs before it
//! can enable the MMU and jump into a higher-half kernel. It does not manage
//! a live address space: tables are written once, published once, and never
//! modified again.
//!
//! # Architecture
//!
//! - `format`: The [`PagingFormat`] trait describing one hardware table format
//! - `permissions`: The fixed loader-phase permission profile
//! - `tables`: Statically sized table storage and the software walker
//! - `builder`: The alignment-tier mapping policy (plan, then apply)
//! - `traits`: Storage trait and mapping errors
//! - `arch::riscv`: Sv32, Sv39 and Sv48
//! - `arch::arm64`: AArch64 4KB granule, 39-bit VA with split roots
//!
//! # Alignment tiers
//!
//! A region is mapped with the largest leaf the root table can hold (the top
//! tier) when both its virtual and physical bases are aligned to it. Otherwise
//! it falls back to leaves one level down, held in an intermediate table.
//! Anything smaller is rejected: the loader never maps 4KB pages.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod builder;
pub mod format;
pub mod permissions;
pub mod tables;
pub mod traits;

pub mod arch;

// Re-export commonly used types
pub use builder::{MappingPlan, PageTableBuilder, Tier};
pub use format::{Entry, EntryWidth, Memory, PagingFormat};
pub use permissions::LoaderPermissions;
pub use tables::{BootTables, FrameId, TableFrame, log_tables, translate};
pub use traits::{MapError, TableStorage};

/// Page size constant (4KB)
pub const PAGE_SIZE: usize = 4096;

/// log2 of [`PAGE_SIZE`]
pub const PAGE_SHIFT: u32 = 12;

// Compile-time verification of paging constants
const _: () = assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");
const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE, "PAGE_SHIFT must match PAGE_SIZE");
const _: () = assert!(
    core::mem::size_of::<TableFrame>() == PAGE_SIZE,
    "a table frame must occupy exactly one page"
);
const _: () = assert!(
    core::mem::align_of::<TableFrame>() == PAGE_SIZE,
    "table frames must be page aligned"
);
