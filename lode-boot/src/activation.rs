//! VM activation sequence
//!
//! Each core turns translation on for itself in three steps, encoded as a
//! typestate so they cannot be reordered or repeated:
//!
//! ```text
//! Inactive --fence_data--> Publishing --root write + fence_instructions--> Active
//! ```
//!
//! There is no way back from `Active`.

use core::marker::PhantomData;

use lode_arch::{Architecture, TranslationRoot};

mod sealed {
    pub trait Sealed {}
}

/// A step of the activation sequence.
pub trait VmState: sealed::Sealed {
    const NAME: &'static str;
}

/// Translation off; table writes may still be in flight
pub struct Inactive;
/// Table writes are visible; the root has not been written yet
pub struct Publishing;
/// Translation on with the published root
pub struct Active;

impl sealed::Sealed for Inactive {}
impl sealed::Sealed for Publishing {}
impl sealed::Sealed for Active {}

impl VmState for Inactive {
    const NAME: &'static str = "inactive";
}
impl VmState for Publishing {
    const NAME: &'static str = "publishing";
}
impl VmState for Active {
    const NAME: &'static str = "active";
}

/// Activation of `root` on the calling core, in state `S`.
#[must_use = "dropping an activation abandons the sequence"]
pub struct Activation<'a, A: Architecture, S: VmState> {
    arch: &'a A,
    root: TranslationRoot,
    _state: PhantomData<S>,
}

impl<'a, A: Architecture, S: VmState> Activation<'a, A, S> {
    fn into_state<T: VmState>(self) -> Activation<'a, A, T> {
        log::trace!("vm: {} -> {}", S::NAME, T::NAME);
        Activation {
            arch: self.arch,
            root: self.root,
            _state: PhantomData,
        }
    }

    /// The roots this activation publishes.
    pub fn root(&self) -> TranslationRoot {
        self.root
    }

    pub fn state(&self) -> &'static str {
        S::NAME
    }

    pub fn arch(&self) -> &'a A {
        self.arch
    }
}

impl<'a, A: Architecture> Activation<'a, A, Inactive> {
    pub fn new(arch: &'a A, root: TranslationRoot) -> Self {
        Self {
            arch,
            root,
            _state: PhantomData,
        }
    }

    /// Make every table write visible to the walker.
    pub fn fence(self) -> Activation<'a, A, Publishing> {
        self.arch.fence_data();
        self.into_state()
    }
}

impl<'a, A: Architecture> Activation<'a, A, Publishing> {
    /// Write the translation root and resynchronise instruction fetch.
    ///
    /// # Safety
    ///
    /// The tables under the root must identity map the code and stack of the
    /// calling core, and must not be written again.
    pub unsafe fn publish(self) -> Activation<'a, A, Active> {
        // SAFETY: Caller guarantees the self-map covers this code, and the
        // Publishing state guarantees the tables were fenced.
        unsafe { self.arch.publish_translation_root(self.root) };
        self.arch.fence_instructions();
        self.into_state()
    }
}

/// Run the full sequence.
///
/// # Safety
///
/// As for [`Activation::publish`].
pub unsafe fn activate<A: Architecture>(arch: &A, root: TranslationRoot) -> Activation<'_, A, Active> {
    // SAFETY: Forwarded from the caller
    unsafe { Activation::new(arch, root).fence().publish() }
}
