//! AArch64 translation descriptors
//!
//! Descriptor format (ARMv8-A, 4KB granule):
//! ```text
//! +---+--------+-----+-----+---+------------------------+----+----+----+----+----+------+----+----+
//! | R |   SW   | UXN | PXN | R | Output address [47:12] | nG | AF | SH | AP | NS | INDX | TB | VB |
//! +---+--------+-----+-----+---+------------------------+----+----+----+----+----+------+----+----+
//!  63  58    55 54    53    52  47                    12 11   10   9  8 7  6 5    4    2 1    0
//! ```
//!
//! Bits `[1:0]` select the kind: `0b01` is a block at the 1GB and 2MB levels,
//! `0b11` is a table pointer at those levels and a page at the last level.

use tock_registers::{
    interfaces::{ReadWriteable, Readable},
    register_bitfields,
    registers::InMemoryRegister,
};

use lode_common::PhysAddr;

use crate::format::Entry;
use crate::permissions::LoaderPermissions;

// Output address masks
pub(crate) const PAGE_OUTPUT_MASK: u64 = 0x0000_FFFF_FFFF_F000; // bits [47:12]
pub(crate) const L2_BLOCK_OUTPUT_MASK: u64 = 0x0000_FFFF_FFE0_0000; // bits [47:21]
pub(crate) const L1_BLOCK_OUTPUT_MASK: u64 = 0x0000_FFFF_C000_0000; // bits [47:30]
pub(crate) const TABLE_OUTPUT_MASK: u64 = 0x0000_FFFF_FFFF_F000; // bits [47:12]

/// MAIR attribute index of normal write-back memory
pub const MAIR_IDX_NORMAL: u64 = 0;
/// MAIR attribute index of device nGnRnE memory
pub const MAIR_IDX_DEVICE: u64 = 1;

register_bitfields![u64,
    /// Common descriptor fields for all levels
    pub DescriptorFields [
        /// Valid bit - entry is valid when set
        VALID OFFSET(0) NUMBITS(1) [],

        /// Type bit - 0=Block, 1=Table/Page
        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            TableOrPage = 1
        ],

        /// Memory attribute index into MAIR_EL1
        ATTR_INDEX OFFSET(2) NUMBITS(3) [
            Normal = 0,
            Device = 1
        ],

        /// Access permissions
        AP OFFSET(6) NUMBITS(2) [
            /// Read/Write at EL1, no access at EL0
            RW_EL1 = 0b00,
            /// Read/Write at EL1 and EL0
            RW_EL0 = 0b01,
            /// Read-only at EL1, no access at EL0
            RO_EL1 = 0b10,
            /// Read-only at EL1 and EL0
            RO_EL0 = 0b11
        ],

        /// Shareability
        SH OFFSET(8) NUMBITS(2) [
            NonShareable = 0b00,
            OuterShareable = 0b10,
            InnerShareable = 0b11
        ],

        /// Access flag
        AF OFFSET(10) NUMBITS(1) [],

        /// Not global
        NG OFFSET(11) NUMBITS(1) [],

        /// Privileged Execute Never
        PXN OFFSET(53) NUMBITS(1) [],

        /// Unprivileged Execute Never
        UXN OFFSET(54) NUMBITS(1) []
    ]
];

type Descriptor = InMemoryRegister<u64, DescriptorFields::Register>;

/// Output address mask of a block or page at `level`, or `None` if the level
/// cannot hold leaves.
#[must_use]
pub const fn output_mask(level: usize) -> Option<u64> {
    match level {
        0 => Some(L1_BLOCK_OUTPUT_MASK),
        1 => Some(L2_BLOCK_OUTPUT_MASK),
        2 => Some(PAGE_OUTPUT_MASK),
        _ => None,
    }
}

/// Encode a block (levels 0 and 1) or page (level 2) descriptor.
#[must_use]
pub fn block_or_page(pa: PhysAddr, level: usize, last_level: bool, perms: LoaderPermissions) -> u64 {
    let mask = output_mask(level).unwrap_or(PAGE_OUTPUT_MASK);
    debug_assert!(pa.as_u64() & !mask & 0x0000_FFFF_FFFF_FFFF == 0, "unaligned output address");

    let reg = Descriptor::new(pa.as_u64() & mask);
    reg.modify(DescriptorFields::VALID::SET);
    if last_level {
        reg.modify(DescriptorFields::TYPE::TableOrPage);
    } else {
        reg.modify(DescriptorFields::TYPE::Block);
    }
    reg.modify(DescriptorFields::ATTR_INDEX::Normal + DescriptorFields::SH::InnerShareable);

    if perms.accessed {
        reg.modify(DescriptorFields::AF::SET);
    }

    let ap = match (perms.user, perms.write) {
        (false, true) => DescriptorFields::AP::RW_EL1,
        (true, true) => DescriptorFields::AP::RW_EL0,
        (false, false) => DescriptorFields::AP::RO_EL1,
        (true, false) => DescriptorFields::AP::RO_EL0,
    };
    reg.modify(ap);

    // Kernel-only execution: EL0 never executes loader mappings
    if !perms.execute {
        reg.modify(DescriptorFields::PXN::SET + DescriptorFields::UXN::SET);
    } else if !perms.user {
        reg.modify(DescriptorFields::UXN::SET);
    }

    if !perms.global {
        reg.modify(DescriptorFields::NG::SET);
    }

    reg.get()
}

/// Encode a block or page of device nGnRnE memory.
///
/// Device mappings are never executable, whatever `perms` says.
#[must_use]
pub fn device_block_or_page(pa: PhysAddr, level: usize, last_level: bool, perms: LoaderPermissions) -> u64 {
    let reg = Descriptor::new(block_or_page(pa, level, last_level, perms));
    reg.modify(
        DescriptorFields::ATTR_INDEX::Device
            + DescriptorFields::SH::NonShareable
            + DescriptorFields::PXN::SET
            + DescriptorFields::UXN::SET,
    );
    reg.get()
}

/// Encode a table descriptor pointing at `child`.
#[must_use]
pub fn table(child: PhysAddr) -> u64 {
    debug_assert!(child.is_page_aligned());
    let reg = Descriptor::new(child.as_u64() & TABLE_OUTPUT_MASK);
    reg.modify(DescriptorFields::VALID::SET + DescriptorFields::TYPE::TableOrPage);
    reg.get()
}

/// Decode a descriptor found at `level`.
#[must_use]
pub fn decode(raw: u64, level: usize, last_level: bool) -> Entry {
    let reg = Descriptor::new(raw);
    if !reg.is_set(DescriptorFields::VALID) {
        return Entry::Invalid;
    }
    let is_table_or_page = reg.matches_all(DescriptorFields::TYPE::TableOrPage);
    let Some(mask) = output_mask(level) else {
        return Entry::Invalid;
    };

    match (last_level, is_table_or_page) {
        (false, true) => Entry::NextLevel(PhysAddr::new(raw & TABLE_OUTPUT_MASK)),
        (false, false) | (true, true) => Entry::Leaf {
            base: PhysAddr::new(raw & mask),
            attrs: raw & !mask,
        },
        // Block encoding at the page level is reserved
        (true, false) => Entry::Invalid,
    }
}

/// Permissions carried by a leaf descriptor.
#[must_use]
pub fn permissions(raw: u64) -> LoaderPermissions {
    let reg = Descriptor::new(raw);
    let (write, user) = match reg.read(DescriptorFields::AP) {
        0b00 => (true, false),
        0b01 => (true, true),
        0b10 => (false, false),
        _ => (false, true),
    };
    LoaderPermissions {
        read: true,
        write,
        execute: !reg.is_set(DescriptorFields::PXN),
        user,
        global: !reg.is_set(DescriptorFields::NG),
        accessed: reg.is_set(DescriptorFields::AF),
        // No hardware dirty state is used; writable implies dirty
        dirty: write,
    }
}
