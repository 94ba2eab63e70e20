//! AArch64 translation tables
//!
//! The loader uses a 4KB granule with a 39-bit virtual address space, so
//! translation starts at the 1GB level:
//! - level 0: 1GB per entry (table or block)
//! - level 1: 2MB per entry (table or block)
//! - level 2: 4KB per entry (page only)
//!
//! The low half (TTBR0) holds the identity map of the loader, the high half
//! (TTBR1) holds the kernel window, so the two maps have separate roots.

pub mod descriptors;

use lode_common::PhysAddr;

use crate::format::{Entry, EntryWidth, PagingFormat};
use crate::permissions::LoaderPermissions;

pub use descriptors::{MAIR_IDX_DEVICE, MAIR_IDX_NORMAL};

/// Virtual address bits translated by each half
pub const VA_BITS: u32 = 39;

/// AArch64, 4KB granule, 3 levels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Aarch64;

impl PagingFormat for Aarch64 {
    const NAME: &'static str = "AArch64/39";
    const LEVELS: usize = 3;
    const INDEX_BITS: u32 = 9;
    const WIDTH: EntryWidth = EntryWidth::Wide;
    const SPLIT_ROOTS: bool = true;

    fn leaf(base: PhysAddr, level: usize) -> u64 {
        descriptors::block_or_page(
            base,
            level,
            level == Self::LEVELS - 1,
            LoaderPermissions::PROFILE,
        )
    }

    fn device_leaf(base: PhysAddr, level: usize) -> u64 {
        descriptors::device_block_or_page(
            base,
            level,
            level == Self::LEVELS - 1,
            LoaderPermissions::PROFILE,
        )
    }

    fn next_level(child: PhysAddr) -> u64 {
        descriptors::table(child)
    }

    fn decode(raw: u64, level: usize) -> Entry {
        descriptors::decode(raw, level, level == Self::LEVELS - 1)
    }

    fn root_register(root: PhysAddr) -> u64 {
        // ASID 0, CnP clear
        root.as_u64() & descriptors::TABLE_OUTPUT_MASK
    }
}

const _: () = assert!(
    crate::PAGE_SHIFT + 9 * 3 == VA_BITS,
    "three 9-bit levels over 4KB pages cover 39 bits"
);

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1 << 30;

    #[test]
    fn test_block_descriptor_bits() {
        let raw = Aarch64::leaf(PhysAddr::new(0x4000_0000), 0);
        // valid block, AF, inner shareable, normal memory, RW_EL1, UXN
        assert_eq!(raw & 0b11, 0b01);
        assert_eq!(raw & (1 << 10), 1 << 10);
        assert_eq!((raw >> 8) & 0b11, 0b11);
        assert_eq!((raw >> 2) & 0b111, MAIR_IDX_NORMAL);
        assert_eq!((raw >> 6) & 0b11, 0);
        assert_eq!(raw & (1 << 54), 1 << 54);
        assert_eq!(raw & (1 << 53), 0);
        assert_eq!(raw & (1 << 11), 0);
        assert_eq!(raw & descriptors::L1_BLOCK_OUTPUT_MASK, 0x4000_0000);
    }

    #[test]
    fn test_device_block_bits() {
        let raw = Aarch64::device_leaf(PhysAddr::new(0x0900_0000 & !(GIB - 1)), 0);
        assert_eq!(raw & 0b11, 0b01);
        assert_eq!((raw >> 2) & 0b111, MAIR_IDX_DEVICE);
        assert_eq!((raw >> 8) & 0b11, 0b00);
        assert_eq!(raw & (1 << 53), 1 << 53);
        assert_eq!(raw & (1 << 54), 1 << 54);
        assert_eq!(raw & (1 << 10), 1 << 10);
        assert!(matches!(Aarch64::decode(raw, 0), Entry::Leaf { base, .. } if base.as_u64() == 0));
    }

    #[test]
    fn test_page_level_uses_page_encoding() {
        let raw = Aarch64::leaf(PhysAddr::new(0x4000_3000), 2);
        assert_eq!(raw & 0b11, 0b11);
        assert!(matches!(Aarch64::decode(raw, 2), Entry::Leaf { base, .. } if base.as_u64() == 0x4000_3000));
        // the same bits one level up are a table pointer
        assert_eq!(Aarch64::decode(raw, 1), Entry::NextLevel(PhysAddr::new(0x4000_3000)));
    }

    #[test]
    fn test_leaf_round_trip() {
        for level in 0..2 {
            let size = Aarch64::level_size(level);
            for n in [0u64, 1, 2, 0x1FF, 0x2000] {
                let pa = PhysAddr::new(n * size);
                match Aarch64::decode(Aarch64::leaf(pa, level), level) {
                    Entry::Leaf { base, .. } => assert_eq!(base, pa),
                    other => panic!("expected leaf, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_table_descriptor() {
        let raw = Aarch64::next_level(PhysAddr::new(0x4008_1000));
        assert_eq!(raw, 0x4008_1000 | 0b11);
        assert_eq!(Aarch64::decode(raw, 0), Entry::NextLevel(PhysAddr::new(0x4008_1000)));
    }

    #[test]
    fn test_reserved_encoding_is_invalid() {
        assert_eq!(Aarch64::decode(0x4000_0001, 2), Entry::Invalid);
        assert_eq!(Aarch64::decode(0x4000_0002, 0), Entry::Invalid);
    }

    #[test]
    fn test_permissions_decode_profile() {
        let raw = Aarch64::leaf(PhysAddr::new(0x8020_0000), 1);
        assert_eq!(descriptors::permissions(raw), LoaderPermissions::PROFILE);
    }
}
