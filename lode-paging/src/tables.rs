//! Static table storage
//!
//! All translation tables live in one fixed array of page-sized frames that
//! is reserved in the loader image. Frames are handed out in order and never
//! returned. With the MMU off the address of a frame is its physical address.

use core::fmt;
use core::marker::PhantomData;
use core::ptr;

use lode_common::{PhysAddr, VirtAddr};

use crate::format::{Entry, EntryWidth, PagingFormat};
use crate::traits::TableStorage;
use crate::PAGE_SIZE;

/// One 4KB translation table, viewed as either entry width.
#[derive(Clone, Copy)]
#[repr(C, align(4096))]
pub union TableFrame {
    wide: [u64; 512],
    narrow: [u32; 1024],
}

impl TableFrame {
    /// A frame with every entry invalid
    pub const ZERO: Self = Self { wide: [0; 512] };

    /// Read entry `index` as `width`.
    #[inline]
    #[must_use]
    pub fn get(&self, width: EntryWidth, index: usize) -> u64 {
        // SAFETY: Both views are plain integer arrays covering the same 4KB,
        // every bit pattern is valid for either.
        unsafe {
            match width {
                EntryWidth::Wide => ptr::read_volatile(&self.wide[index]),
                EntryWidth::Narrow => u64::from(ptr::read_volatile(&self.narrow[index])),
            }
        }
    }

    /// Write entry `index` as `width`.
    ///
    /// Narrow writes keep the low 32 bits of `raw`.
    #[inline]
    pub fn set(&mut self, width: EntryWidth, index: usize, raw: u64) {
        // SAFETY: As in `get`; the indexing is bounds checked.
        unsafe {
            match width {
                EntryWidth::Wide => ptr::write_volatile(&mut self.wide[index], raw),
                EntryWidth::Narrow => ptr::write_volatile(&mut self.narrow[index], raw as u32),
            }
        }
    }

    fn clear(&mut self) {
        *self = Self::ZERO;
    }
}

/// Index of a frame within its storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId(pub usize);

/// Fixed pool of `N` table frames for format `F`.
pub struct BootTables<F: PagingFormat, const N: usize> {
    frames: [TableFrame; N],
    used: usize,
    _format: PhantomData<fn() -> F>,
}

impl<F: PagingFormat, const N: usize> BootTables<F, N> {
    /// Create an empty pool. Usable in a `static` initialiser.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: [TableFrame::ZERO; N],
            used: 0,
            _format: PhantomData,
        }
    }

    /// Number of frames handed out so far.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Total number of frames.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Decode the entry at `index` of `frame`, read as a table at `level`.
    #[must_use]
    pub fn entry(&self, frame: FrameId, level: usize, index: usize) -> Entry {
        F::decode(self.read(frame, index), level)
    }

    /// Count the valid entries of a frame.
    #[must_use]
    pub fn valid_entries(&self, frame: FrameId) -> usize {
        (0..F::entries()).filter(|&i| self.read(frame, i) != 0).count()
    }

    fn base(&self) -> u64 {
        self.frames.as_ptr() as usize as u64
    }
}

impl<F: PagingFormat, const N: usize> Default for BootTables<F, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PagingFormat, const N: usize> TableStorage for BootTables<F, N> {
    fn allocate(&mut self) -> Option<FrameId> {
        if self.used == N {
            return None;
        }
        let id = FrameId(self.used);
        self.used += 1;
        self.frames[id.0].clear();
        Some(id)
    }

    fn frames_available(&self) -> usize {
        N - self.used
    }

    fn frame_address(&self, frame: FrameId) -> PhysAddr {
        PhysAddr::new(self.base() + (frame.0 * PAGE_SIZE) as u64)
    }

    fn frame_at(&self, pa: PhysAddr) -> Option<FrameId> {
        let offset = pa.as_u64().checked_sub(self.base())?;
        if !pa.is_page_aligned() {
            return None;
        }
        let index = (offset / PAGE_SIZE as u64) as usize;
        (index < self.used).then_some(FrameId(index))
    }

    fn read(&self, frame: FrameId, index: usize) -> u64 {
        self.frames[frame.0].get(F::WIDTH, index)
    }

    fn write(&mut self, frame: FrameId, index: usize, raw: u64) {
        self.frames[frame.0].set(F::WIDTH, index, raw);
    }
}

/// Walk the tables under `root` in software and translate `va`.
///
/// Returns `None` if the address is unmapped or a table pointer leaves the
/// storage.
#[must_use]
pub fn translate<F: PagingFormat, S: TableStorage>(
    storage: &S,
    root: FrameId,
    va: VirtAddr,
) -> Option<PhysAddr> {
    let mut frame = root;
    for level in 0..F::LEVELS {
        let raw = storage.read(frame, F::index(va, level));
        match F::decode(raw, level) {
            Entry::Invalid => return None,
            Entry::Leaf { base, .. } => {
                let offset = va.as_u64() & (F::level_size(level) - 1);
                return Some(base.offset(offset));
            }
            Entry::NextLevel(child) => frame = storage.frame_at(child)?,
        }
    }
    None
}

/// Raw entry formatted the way its format prints it.
struct RawEntry<F> {
    raw: u64,
    level: usize,
    _format: PhantomData<fn() -> F>,
}

impl<F: PagingFormat> fmt::Debug for RawEntry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        F::fmt_entry(self.raw, self.level, f)
    }
}

/// Log every valid entry of the table tree under `frame`.
pub fn log_tables<F: PagingFormat, S: TableStorage>(storage: &S, frame: FrameId, level: usize) {
    for index in 0..F::entries() {
        let entry = F::decode(storage.read(frame, index), level);
        if !entry.is_valid() {
            continue;
        }
        let raw = RawEntry::<F> { raw: storage.read(frame, index), level, _format: PhantomData };
        log::debug!("{} L{} [{:4}] {:?}", F::NAME, level, index, raw);
        if let Entry::NextLevel(child) = entry {
            if let Some(child) = storage.frame_at(child) {
                log_tables::<F, S>(storage, child, level + 1);
            }
        }
    }
}
