//! Image intake
//!
//! The packaging step places the kernel and the initial user program in
//! memory next to the loader and records where they went in an
//! [`ImageManifest`]. The loader only reads that record; it never parses the
//! images themselves.

use lode_common::{BootError, LoadedImages, RegionDescriptor};

/// Source of the kernel and user image descriptors.
pub trait ImageLoader {
    /// Return the descriptors of the unpacked images.
    ///
    /// The result has not been validated; callers check it with
    /// [`LoadedImages::validate`] before using it.
    fn load_images(&mut self) -> Result<LoadedImages, BootError>;
}

/// Placement of one image as written by the packager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ManifestRegion {
    pub phys_start: u64,
    pub phys_end: u64,
    pub virt_start: u64,
    pub virt_entry: u64,
}

impl ManifestRegion {
    pub const EMPTY: Self = Self { phys_start: 0, phys_end: 0, virt_start: 0, virt_entry: 0 };

    fn descriptor(&self) -> RegionDescriptor {
        RegionDescriptor::new(self.phys_start, self.phys_end, self.virt_start, self.virt_entry)
    }
}

/// Image record patched into the loader binary by the packager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ImageManifest {
    /// [`ImageManifest::MAGIC`] once patched
    pub magic: u32,
    /// [`ImageManifest::VERSION`]
    pub version: u32,
    /// Number of user images packed
    pub num_apps: u32,
    pub _reserved: u32,
    pub kernel: ManifestRegion,
    pub user: ManifestRegion,
}

impl ImageManifest {
    /// "LODE", little endian
    pub const MAGIC: u32 = u32::from_le_bytes(*b"LODE");
    pub const VERSION: u32 = 1;

    /// The unpatched record linked into the loader.
    pub const UNPATCHED: Self = Self {
        magic: 0,
        version: 0,
        num_apps: 0,
        _reserved: 0,
        kernel: ManifestRegion::EMPTY,
        user: ManifestRegion::EMPTY,
    };

    /// A patched record for the given placements.
    #[must_use]
    pub const fn new(kernel: ManifestRegion, user: ManifestRegion, num_apps: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            num_apps,
            _reserved: 0,
            kernel,
            user,
        }
    }
}

const _: () = assert!(core::mem::size_of::<ImageManifest>() == 80);

/// [`ImageLoader`] reading an [`ImageManifest`].
pub struct ManifestLoader<'a> {
    manifest: &'a ImageManifest,
}

impl<'a> ManifestLoader<'a> {
    pub const fn new(manifest: &'a ImageManifest) -> Self {
        Self { manifest }
    }
}

impl ImageLoader for ManifestLoader<'_> {
    fn load_images(&mut self) -> Result<LoadedImages, BootError> {
        // The record is rewritten after linking, so the compiler must not
        // assume it still holds its initialiser.
        // SAFETY: The reference is valid and properly aligned
        let manifest = unsafe { core::ptr::read_volatile(self.manifest) };

        if manifest.magic != ImageManifest::MAGIC || manifest.version != ImageManifest::VERSION {
            return Err(BootError::InvalidManifest {
                magic: manifest.magic,
                version: manifest.version,
            });
        }

        let images = LoadedImages {
            kernel: manifest.kernel.descriptor(),
            user: manifest.user.descriptor(),
            num_apps: manifest.num_apps,
        };
        log::info!(
            "kernel: {}..{} -> {}..{} entry {}",
            images.kernel.phys_start,
            images.kernel.phys_end,
            images.kernel.virt_start,
            images.kernel.virt_end,
            images.kernel.virt_entry
        );
        log::info!(
            "user:   {}..{} -> {}..{} entry {} ({} image(s))",
            images.user.phys_start,
            images.user.phys_end,
            images.user.virt_start,
            images.user.virt_end,
            images.user.virt_entry,
            images.num_apps
        );
        Ok(images)
    }
}
