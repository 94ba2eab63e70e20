//! Page table format description
//!
//! Every supported translation scheme is a zero-sized type implementing
//! [`PagingFormat`]. The builder and the walker only ever talk to tables
//! through this trait, so the mapping policy is shared by all of them.

use core::fmt;

use lode_common::{PhysAddr, VirtAddr};

use crate::PAGE_SHIFT;

/// Width of a single table entry in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryWidth {
    /// 32-bit entries, 1024 per table (Sv32)
    Narrow,
    /// 64-bit entries, 512 per table
    Wide,
}

impl EntryWidth {
    /// Number of entries in one 4KB table.
    #[inline]
    #[must_use]
    pub const fn entries(self) -> usize {
        match self {
            Self::Narrow => 1024,
            Self::Wide => 512,
        }
    }
}

/// Decoded table entry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Slot is empty
    Invalid,
    /// Maps a block of physical memory of the level's granularity
    Leaf {
        /// Physical base of the block
        base: PhysAddr,
        /// Format-specific attribute bits with the address field cleared
        attrs: u64,
    },
    /// Points at a child table one level down
    NextLevel(PhysAddr),
}

impl Entry {
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// Memory type of a mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Memory {
    /// Cacheable RAM holding code and data
    #[default]
    Normal,
    /// Memory-mapped I/O: uncached, never executed
    Device,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "Entry::Invalid"),
            Self::Leaf { base, attrs } => write!(f, "Entry::Leaf({:#x}, attrs={:#x})", base.as_u64(), attrs),
            Self::NextLevel(child) => write!(f, "Entry::NextLevel({:#x})", child.as_u64()),
        }
    }
}

/// A hardware page table format.
///
/// Levels are numbered from the root: level `0` is the root table and
/// level `LEVELS - 1` holds the smallest (4KB) pages.
pub trait PagingFormat {
    /// Human readable name for diagnostics
    const NAME: &'static str;

    /// Number of table levels
    const LEVELS: usize;

    /// Virtual address bits consumed per level
    const INDEX_BITS: u32;

    /// Entry width in memory
    const WIDTH: EntryWidth;

    /// Whether the self-map and the kernel map live under separate roots
    const SPLIT_ROOTS: bool;

    /// Encode a leaf for `base` at `level` with the loader permission profile.
    fn leaf(base: PhysAddr, level: usize) -> u64;

    /// Encode a leaf for memory-mapped I/O.
    ///
    /// Formats whose entries carry no memory type (RISC-V takes it from the
    /// platform's physical memory attributes) use the ordinary leaf.
    fn device_leaf(base: PhysAddr, level: usize) -> u64 {
        Self::leaf(base, level)
    }

    /// Encode a pointer to a child table.
    fn next_level(child: PhysAddr) -> u64;

    /// Decode a raw entry found at `level`.
    fn decode(raw: u64, level: usize) -> Entry;

    /// Value to write to the translation root register for `root`.
    fn root_register(root: PhysAddr) -> u64;

    /// Format a raw entry found at `level` for the table dump.
    fn fmt_entry(raw: u64, level: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Self::decode(raw, level), f)
    }

    /// Shift of the region covered by one entry at `level`.
    #[inline]
    #[must_use]
    fn level_shift(level: usize) -> u32 {
        PAGE_SHIFT + Self::INDEX_BITS * (Self::LEVELS - 1 - level) as u32
    }

    /// Bytes covered by one entry at `level`.
    #[inline]
    #[must_use]
    fn level_size(level: usize) -> u64 {
        1u64 << Self::level_shift(level)
    }

    /// Index of `va` within a table at `level`.
    #[inline]
    #[must_use]
    fn index(va: VirtAddr, level: usize) -> usize {
        let mask = (1u64 << Self::INDEX_BITS) - 1;
        ((va.as_u64() >> Self::level_shift(level)) & mask) as usize
    }

    /// Number of entries in one table.
    #[inline]
    #[must_use]
    fn entries() -> usize {
        Self::WIDTH.entries()
    }
}
