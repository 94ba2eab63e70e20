//! Core identity and secondary wake-up data

/// Identity of one core for the duration of the boot.
///
/// Hardware ids are whatever the platform uses (MPIDR affinity, hart id) and
/// may be sparse. Logical ids are dense, `0..N`, with the primary at 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CoreIdentity {
    /// Platform hardware id
    pub hw_id: u64,
    /// Dense logical index
    pub logical_id: usize,
}

impl CoreIdentity {
    /// Identity of the primary core.
    #[must_use]
    pub const fn primary(hw_id: u64) -> Self {
        Self { hw_id, logical_id: 0 }
    }

    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.logical_id == 0
    }
}

/// Wake-up data passed to a secondary core by the bring-up driver.
///
/// The secondary entry stub reads this block with the MMU off before it has
/// a stack, so the layout is fixed and the field offsets are exported for
/// the assembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct SecondaryWakeup {
    /// Top of this core's boot stack
    pub stack_top: u64,
    /// Platform hardware id
    pub hw_id: u64,
    /// Dense logical index
    pub logical_id: u64,
    /// Address of the shared boot context
    pub context: u64,
}

impl SecondaryWakeup {
    pub const STACK_TOP_OFFSET: usize = core::mem::offset_of!(Self, stack_top);
    pub const HW_ID_OFFSET: usize = core::mem::offset_of!(Self, hw_id);
    pub const LOGICAL_ID_OFFSET: usize = core::mem::offset_of!(Self, logical_id);
    pub const CONTEXT_OFFSET: usize = core::mem::offset_of!(Self, context);

    #[must_use]
    pub const fn identity(&self) -> CoreIdentity {
        CoreIdentity { hw_id: self.hw_id, logical_id: self.logical_id as usize }
    }
}

const _: () = assert!(SecondaryWakeup::STACK_TOP_OFFSET == 0);
const _: () = assert!(core::mem::size_of::<SecondaryWakeup>() == 32);
