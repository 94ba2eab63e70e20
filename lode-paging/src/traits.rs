//! Storage trait and mapping errors
//!
//! - `TableStorage`: Where table frames come from and how entries are accessed
//! - `MapError`: Why a mapping could not be built

use lode_common::{BootError, PhysAddr, VirtAddr};

use crate::tables::FrameId;

/// Backing store for translation tables.
///
/// Implementations hand out zeroed, page-aligned frames and provide entry
/// access by frame and index. The builder reads and writes tables only
/// through this trait, which lets tests observe the exact write sequence.
pub trait TableStorage {
    /// Allocate a zeroed table frame.
    ///
    /// Returns `None` once the storage is exhausted.
    fn allocate(&mut self) -> Option<FrameId>;

    /// Number of frames that can still be allocated.
    fn frames_available(&self) -> usize;

    /// Physical address of a frame.
    fn frame_address(&self, frame: FrameId) -> PhysAddr;

    /// Find the frame that lives at `pa`, if it belongs to this storage.
    fn frame_at(&self, pa: PhysAddr) -> Option<FrameId>;

    /// Read the raw entry at `index` of `frame`.
    fn read(&self, frame: FrameId, index: usize) -> u64;

    /// Write the raw entry at `index` of `frame`.
    fn write(&mut self, frame: FrameId, index: usize, raw: u64);
}

/// Errors that can occur while planning a mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "mapping errors must be handled"]
pub enum MapError {
    /// Neither the top tier nor the fallback tier fits the region's bases
    Misaligned {
        virt: VirtAddr,
        phys: PhysAddr,
        size: u64,
    },
    /// A slot the mapping needs already holds a different entry
    Overlap { virt: VirtAddr },
    /// Not enough free frames for the intermediate tables
    StorageExhausted,
    /// The region is empty or extends past the end of the address space
    InvalidRange {
        virt: VirtAddr,
        phys: PhysAddr,
    },
    /// A table entry points outside the storage
    ForeignTable { virt: VirtAddr },
}

impl core::fmt::Display for MapError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Misaligned { virt, phys, size } => {
                write!(f, "region {virt} -> {phys} ({size:#x}) is misaligned for every tier")
            }
            Self::Overlap { virt } => write!(f, "slot for {virt} is already mapped"),
            Self::StorageExhausted => write!(f, "out of table frames"),
            Self::InvalidRange { virt, phys } => write!(f, "invalid range {virt} -> {phys}"),
            Self::ForeignTable { virt } => write!(f, "table for {virt} is outside the storage"),
        }
    }
}

impl From<MapError> for BootError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::Misaligned { virt, phys, size } => Self::MisalignedRegion { virt, phys, size },
            MapError::Overlap { virt } | MapError::ForeignTable { virt } => {
                Self::RegionOverlap { virt }
            }
            MapError::StorageExhausted => Self::TableStorageExhausted,
            MapError::InvalidRange { virt, phys } => Self::InvalidRegion { virt, phys },
        }
    }
}
