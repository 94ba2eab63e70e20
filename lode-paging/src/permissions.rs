//! Loader-phase permission profile
//!
//! Every leaf the loader writes uses the same profile: readable, writable
//! and executable by the kernel only, global, with the accessed and dirty
//! state pre-set so the first kernel access never takes an update fault.
//! The kernel replaces these tables with its own once it is running.

/// Abstract permission set for a loader leaf entry.
///
/// Each format encodes this into its own bit layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoaderPermissions {
    /// Read permission
    pub read: bool,
    /// Write permission
    pub write: bool,
    /// Execute permission
    pub execute: bool,
    /// User-accessible permission
    pub user: bool,
    /// Global mapping (shared across all address spaces)
    pub global: bool,
    /// Accessed flag pre-set
    pub accessed: bool,
    /// Dirty flag pre-set
    pub dirty: bool,
}

impl LoaderPermissions {
    /// The one profile the loader maps with.
    pub const PROFILE: Self = Self {
        read: true,
        write: true,
        execute: true,
        user: false,
        global: true,
        accessed: true,
        dirty: true,
    };
}

impl Default for LoaderPermissions {
    fn default() -> Self {
        Self::PROFILE
    }
}

impl core::fmt::Display for LoaderPermissions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}{}",
            flag(self.dirty, 'D'),
            flag(self.accessed, 'A'),
            flag(self.global, 'G'),
            flag(self.user, 'U'),
            flag(self.execute, 'X'),
            flag(self.write, 'W'),
            flag(self.read, 'R'),
        )
    }
}
