//! The size-class catalogue used by the small-buffer attach path.
//!
//! A small attached buffer is stored in a single block whose size is exactly one
//! of the allocator's size classes, so the header and the data share one
//! allocation without wasting the allocator's rounding slack. Buffers longer
//! than the largest usable size go through the dedicated large-block path.
//!
//! The catalogue is process-wide and immutable once initialized. It defaults to
//! [`SizeClasses::builtin`] on first use; an application running on a different
//! allocator can [`install`](SizeClasses::install) its own class sizes before
//! the first attach.

use std::{alloc::Layout, sync::OnceLock};

use crate::{
    error::{Error, Result},
    header::{BlockRef, HEADER_ALIGNMENT, HEADER_SIZE},
};

/// Largest class of the builtin catalogue.
const BUILTIN_MAX_CLASS: usize = 32 * 1024;

static GLOBAL: OnceLock<SizeClasses> = OnceLock::new();

/// A single catalogue entry: an allocator size class and the number of data
/// bytes it leaves after the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    class_size: usize,
    usable_size: usize,
}

impl SizeClass {
    /// Total block size of this class, header included.
    #[inline]
    pub fn class_size(&self) -> usize {
        self.class_size
    }

    /// Number of data bytes available after the header.
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    /// Allocates a zero-filled block of exactly `class_size` bytes.
    pub(crate) fn allocate(&self) -> BlockRef {
        BlockRef::allocate(self.class_size, true)
    }
}

/// An ascending list of size classes.
#[derive(Debug, Clone)]
pub struct SizeClasses {
    classes: Vec<SizeClass>,
}

impl SizeClasses {
    /// Builds a catalogue from allocator class sizes.
    ///
    /// The sizes are sorted and deduplicated; classes that do not exceed the header
    /// size leave no room for data and are skipped.
    ///
    /// # Errors
    ///
    /// Fails when no class exceeds the header size, or when a class is too large to
    /// form a valid allocation layout.
    pub fn from_class_sizes(sizes: impl IntoIterator<Item = usize>) -> Result<SizeClasses> {
        let mut sizes = sizes.into_iter().collect::<Vec<_>>();
        if let Some(&size) = sizes
            .iter()
            .find(|&&size| Layout::from_size_align(size, HEADER_ALIGNMENT).is_err())
        {
            return Err(Error::invalid_size_classes(format!(
                "class size {size} does not form a valid layout"
            )));
        }
        sizes.sort_unstable();
        sizes.dedup();

        let classes = Self::build(sizes);
        if classes.is_empty() {
            return Err(Error::invalid_size_classes(format!(
                "no class exceeds the header size of {HEADER_SIZE} bytes"
            )));
        }
        Ok(classes)
    }

    /// The default catalogue.
    ///
    /// Follows the spacing of jemalloc-style allocators: 8, 16, 32, 48, 64, then
    /// four evenly spaced classes per power-of-two group, up to 32 KiB.
    pub fn builtin() -> SizeClasses {
        Self::build(builtin_class_sizes())
    }

    /// Returns the process-wide catalogue, initializing it to [`SizeClasses::builtin`]
    /// on first use.
    pub fn global() -> &'static SizeClasses {
        GLOBAL.get_or_init(|| {
            let classes = SizeClasses::builtin();
            log::debug!(
                "initialized builtin size classes: {} classes, small threshold {}",
                classes.len(),
                classes.small_threshold()
            );
            classes
        })
    }

    /// Installs this catalogue as the process-wide one.
    ///
    /// # Errors
    ///
    /// Fails when the process-wide catalogue was already installed or lazily
    /// initialized by an earlier attach.
    pub fn install(self) -> Result<()> {
        let count = self.len();
        let threshold = self.small_threshold();
        GLOBAL.set(self).map_err(|_| Error::already_initialized())?;
        log::debug!("installed size classes: {count} classes, small threshold {threshold}");
        Ok(())
    }

    /// Finds the smallest class whose usable size fits `len` data bytes.
    ///
    /// Returns `None` when `len` exceeds [`small_threshold`](Self::small_threshold).
    #[inline]
    pub fn lookup(&self, len: usize) -> Option<&SizeClass> {
        let idx = self
            .classes
            .partition_point(|class| class.usable_size < len);
        self.classes.get(idx)
    }

    /// The largest data length served by a size class.
    #[inline]
    pub fn small_threshold(&self) -> usize {
        self.classes.last().map_or(0, |class| class.usable_size)
    }

    /// Number of usable classes in the catalogue.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SizeClass> {
        self.classes.iter()
    }

    /// `sizes` must be ascending and deduplicated.
    fn build(sizes: Vec<usize>) -> SizeClasses {
        let classes = sizes
            .into_iter()
            .filter(|&size| size > HEADER_SIZE)
            .map(|class_size| SizeClass {
                class_size,
                usable_size: class_size - HEADER_SIZE,
            })
            .collect();
        SizeClasses { classes }
    }
}

fn builtin_class_sizes() -> Vec<usize> {
    let mut sizes = vec![8, 16, 32, 48, 64];
    let mut group = 64;
    while group < BUILTIN_MAX_CLASS {
        let step = group / 4;
        sizes.extend((1..=4).map(|i| group + i * step));
        group *= 2;
    }
    sizes
}
