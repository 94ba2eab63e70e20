//! Physical and Virtual Address Types
//!
//! Simple address newtypes for region descriptors and the kernel handoff.
//! These provide compile-time distinction between physical and virtual addresses
//! without the full type-level machinery of `lode-paging`.
//!
//! Alignment helpers take the alignment as a number of address bits
//! (`12` for 4 KiB, `21` for 2 MiB, `30` for 1 GiB) since every granularity
//! tier in the loader is a power of two.

use core::fmt;

/// Physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Virtual memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

#[inline]
const fn mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

macro_rules! address_ops {
    ($ty:ident) => {
        impl $ty {
            /// Create a new address.
            #[inline]
            #[must_use]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            /// Get the raw address value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Check if this address is null (zero).
            #[inline]
            #[must_use]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Check if this address is aligned to `1 << bits`.
            #[inline]
            #[must_use]
            pub const fn is_aligned(self, bits: u32) -> bool {
                self.0 & mask(bits) == 0
            }

            /// Align this address down to a `1 << bits` boundary.
            #[inline]
            #[must_use]
            pub const fn align_down(self, bits: u32) -> Self {
                Self(self.0 & !mask(bits))
            }

            /// Align this address up to a `1 << bits` boundary.
            ///
            /// Saturates at the highest aligned address instead of wrapping.
            #[inline]
            #[must_use]
            pub const fn align_up(self, bits: u32) -> Self {
                match self.0.checked_add(mask(bits)) {
                    Some(v) => Self(v & !mask(bits)),
                    None => Self(u64::MAX & !mask(bits)),
                }
            }

            /// Check if this address is page-aligned (4KB).
            #[inline]
            #[must_use]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(12)
            }

            /// Add an offset to this address.
            #[inline]
            #[must_use]
            pub const fn offset(self, offset: u64) -> Self {
                Self(self.0.wrapping_add(offset))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }

        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl From<$ty> for u64 {
            #[inline]
            fn from(addr: $ty) -> u64 {
                addr.0
            }
        }
    };
}

address_ops!(PhysAddr);
address_ops!(VirtAddr);

impl VirtAddr {
    /// Convert to a raw pointer.
    #[inline]
    #[must_use]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as usize as *const T
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        let pa = PhysAddr::new(0x8020_1234);
        assert!(!pa.is_aligned(12));
        assert_eq!(pa.align_down(21), PhysAddr::new(0x8020_0000));
        assert_eq!(pa.align_up(21), PhysAddr::new(0x8040_0000));
        assert!(PhysAddr::new(0x8000_0000).is_aligned(30));
    }

    #[test]
    fn test_align_up_saturates() {
        let va = VirtAddr::new(0xFFFF_FFFF_FFFF_F001);
        assert_eq!(va.align_up(12), VirtAddr::new(0xFFFF_FFFF_FFFF_F000));
    }

    #[test]
    fn test_align_full_width() {
        let va = VirtAddr::new(0x1234);
        assert_eq!(va.align_down(64), VirtAddr::new(0));
        assert!(VirtAddr::new(0).is_aligned(64));
    }
}
