//! Boot-wide error taxonomy
//!
//! Every variant is terminal: the loader reports it once and halts the
//! core. There is no retry path anywhere in the boot.

use core::fmt;

use crate::addr::{PhysAddr, VirtAddr};

/// Fatal boot conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "boot errors are fatal and must be reported"]
pub enum BootError {
    /// The image loader did not unpack exactly one user image
    NoUserImage {
        /// Number of user images found
        found: u32,
    },
    /// Neither the top nor the fallback tier can map the region
    MisalignedRegion {
        /// Virtual base of the region
        virt: VirtAddr,
        /// Physical base of the region
        phys: PhysAddr,
        /// Size of the region in bytes
        size: u64,
    },
    /// The kernel entry point returned to the loader
    UnexpectedReturn {
        /// Entry address that was jumped to
        entry: VirtAddr,
    },
    /// A region descriptor violates its invariants
    InvalidRegion {
        /// Virtual base of the region
        virt: VirtAddr,
        /// Physical base of the region
        phys: PhysAddr,
    },
    /// A mapping would replace an entry that is already valid
    RegionOverlap {
        /// Virtual address of the conflicting slot
        virt: VirtAddr,
    },
    /// The static table storage has no free frame left
    TableStorageExhausted,
    /// The platform reports more cores than the loader was built for
    TooManyCores {
        /// Cores reported by the platform
        found: usize,
        /// Cores the loader supports
        max: usize,
    },
    /// The bring-up driver failed to start a secondary core
    CoreStartFailed {
        /// Hardware id of the core
        hw_id: u64,
        /// Driver-specific status code
        code: i64,
    },
    /// Multiple cores are configured but no bring-up driver matches
    NoSmpDriver,
    /// The image manifest is missing or from an incompatible packager
    InvalidManifest {
        /// Magic value found
        magic: u32,
        /// Format version found
        version: u32,
    },
    /// The self-map does not translate the loader's own code to itself
    SelfMapMissing {
        /// Address that failed to resolve
        addr: PhysAddr,
    },
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUserImage { found } => {
                write!(f, "expected exactly one user image, found {found}")
            }
            Self::MisalignedRegion { virt, phys, size } => write!(
                f,
                "region {virt} -> {phys} ({size:#x} bytes) is not aligned to any mapping tier"
            ),
            Self::UnexpectedReturn { entry } => {
                write!(f, "kernel entry {entry} returned to the loader")
            }
            Self::InvalidRegion { virt, phys } => {
                write!(f, "invalid region descriptor {virt} -> {phys}")
            }
            Self::RegionOverlap { virt } => write!(f, "mapping at {virt} overlaps an existing entry"),
            Self::TableStorageExhausted => write!(f, "page table storage exhausted"),
            Self::TooManyCores { found, max } => {
                write!(f, "platform has {found} cores, loader supports {max}")
            }
            Self::CoreStartFailed { hw_id, code } => {
                write!(f, "failed to start core {hw_id:#x} (status {code})")
            }
            Self::NoSmpDriver => write!(f, "no SMP bring-up driver for this platform"),
            Self::InvalidManifest { magic, version } => {
                write!(f, "bad image manifest (magic {magic:#010x}, version {version})")
            }
            Self::SelfMapMissing { addr } => write!(f, "loader address {addr} is not identity mapped"),
        }
    }
}
