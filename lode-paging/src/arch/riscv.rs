//! RISC-V page table formats
//!
//! Sv32, Sv39 and Sv48 share one entry layout:
//! ```text
//! +------------------------+-----+---+---+---+---+---+---+---+---+
//! |          PPN           | RSW | D | A | G | U | X | W | R | V |
//! +------------------------+-----+---+---+---+---+---+---+---+---+
//!  ..                    10  9  8  7   6   5   4   3   2   1   0
//! ```
//! An entry with any of X/W/R set is a leaf, otherwise it points to the next
//! level. The PPN is the physical address shifted right by 12.

use core::fmt;

use lode_common::PhysAddr;

use crate::format::{Entry, EntryWidth, PagingFormat};
use crate::permissions::LoaderPermissions;
use crate::PAGE_SHIFT;

const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_G: u64 = 1 << 5;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;

const PTE_PPN_SHIFT: u32 = 10;
const PTE_FLAGS_MASK: u64 = (1 << PTE_PPN_SHIFT) - 1;

/// satp MODE field values
const SATP_MODE_SV32: u64 = 1 << 31;
const SATP_MODE_SV39: u64 = 8 << 60;
const SATP_MODE_SV48: u64 = 9 << 60;

/// Leaf flag bits for a permission set.
#[must_use]
pub const fn leaf_flags(perms: LoaderPermissions) -> u64 {
    let mut flags = PTE_V;
    if perms.read {
        flags |= PTE_R;
    }
    if perms.write {
        flags |= PTE_W;
    }
    if perms.execute {
        flags |= PTE_X;
    }
    if perms.user {
        flags |= PTE_U;
    }
    if perms.global {
        flags |= PTE_G;
    }
    if perms.accessed {
        flags |= PTE_A;
    }
    if perms.dirty {
        flags |= PTE_D;
    }
    flags
}

/// Leaf flags of the loader profile
pub const LOADER_LEAF_FLAGS: u64 = leaf_flags(LoaderPermissions::PROFILE);

const _: () = assert!(LOADER_LEAF_FLAGS == 0xEF);

#[inline]
const fn ppn_bits(pa: u64) -> u64 {
    (pa >> PAGE_SHIFT) << PTE_PPN_SHIFT
}

#[inline]
fn decode_common(raw: u64, ppn_width: u32) -> Entry {
    if raw & PTE_V == 0 {
        return Entry::Invalid;
    }
    let ppn = (raw >> PTE_PPN_SHIFT) & ((1u64 << ppn_width) - 1);
    let base = PhysAddr::new(ppn << PAGE_SHIFT);
    if raw & (PTE_R | PTE_W | PTE_X) != 0 {
        Entry::Leaf { base, attrs: raw & PTE_FLAGS_MASK }
    } else {
        Entry::NextLevel(base)
    }
}

macro_rules! riscv_format {
    ($(#[$meta:meta])* $name:ident, $label:literal, $levels:literal, $bits:literal,
     $width:expr, $ppn_width:literal, $mode:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name;

        impl PagingFormat for $name {
            const NAME: &'static str = $label;
            const LEVELS: usize = $levels;
            const INDEX_BITS: u32 = $bits;
            const WIDTH: EntryWidth = $width;
            const SPLIT_ROOTS: bool = false;

            #[inline]
            fn leaf(base: PhysAddr, level: usize) -> u64 {
                debug_assert!(base.is_aligned(Self::level_shift(level)));
                ppn_bits(base.as_u64()) | LOADER_LEAF_FLAGS
            }

            #[inline]
            fn next_level(child: PhysAddr) -> u64 {
                debug_assert!(child.is_page_aligned());
                ppn_bits(child.as_u64()) | PTE_V
            }

            #[inline]
            fn decode(raw: u64, _level: usize) -> Entry {
                decode_common(raw, $ppn_width)
            }

            fn fmt_entry(raw: u64, _level: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&Pte(raw), f)
            }

            #[inline]
            fn root_register(root: PhysAddr) -> u64 {
                $mode | (root.as_u64() >> PAGE_SHIFT)
            }
        }
    };
}

riscv_format!(
    /// Sv32: two levels, 4MB top-tier leaves, 32-bit entries
    Sv32, "Sv32", 2, 10, EntryWidth::Narrow, 22, SATP_MODE_SV32
);
riscv_format!(
    /// Sv39: three levels, 1GB top-tier leaves
    Sv39, "Sv39", 3, 9, EntryWidth::Wide, 44, SATP_MODE_SV39
);
riscv_format!(
    /// Sv48: four levels, 512GB top-tier leaves
    Sv48, "Sv48", 4, 9, EntryWidth::Wide, 44, SATP_MODE_SV48
);

/// Field-by-field view of a raw RISC-V entry for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pte(pub u64);

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = self.0;
        let bit = |b: u64| u8::from(x & b != 0);
        write!(
            f,
            "PPN:{:#x} RSW:{} D:{} A:{} G:{} U:{} XWR:{:03b} V:{} -> {:#018x}",
            x >> PTE_PPN_SHIFT,
            (x >> 8) & 0b11,
            bit(PTE_D),
            bit(PTE_A),
            bit(PTE_G),
            bit(PTE_U),
            (x >> 1) & 0b111,
            bit(PTE_V),
            (x >> PTE_PPN_SHIFT) << PAGE_SHIFT,
        )
    }
}
