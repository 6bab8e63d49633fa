//! Immutable shared byte buffers that can carry a hidden, strongly-typed payload.
//!
//! A payload is attached by placing a checksummed header right before the
//! buffer's data. Every clone or zero-copy view that starts at the same data
//! pointer resolves to the same header, while the buffer's content, length and
//! equality stay exactly those of the bytes it holds. See [`attachment`] for the
//! operations and [`size_class`] for the allocation catalogue.

use std::{
    borrow::Borrow,
    cmp::Ordering,
    hash::{Hash, Hasher},
    ops::RangeBounds,
};

use buffer::Buffer;

pub mod attachment;
pub mod buffer;
pub mod error;
pub mod header;
pub mod size_class;


pub use attachment::{attach, attach_value, detach, is_attached, read, read_as, replace, slice};
pub use error::{Error, ErrorKind, Result};
pub use header::{HEADER_SIZE, Payload};
pub use size_class::{SizeClass, SizeClasses};

/// A contiguous, immutable memory region that can be shared with other buffers and across
/// thread boundaries.
///
/// `Bytes` can be sliced and cloned without copying the underlying data. Equality,
/// ordering and hashing are by content only, so an attached buffer behaves exactly
/// like an ordinary one with the same bytes, including as a map key.
#[derive(Clone)]
pub struct Bytes(Buffer);

impl Bytes {
    /// Creates a new empty `Bytes`.
    #[inline]
    pub const fn new() -> Self {
        Bytes(Buffer::new())
    }

    /// Returns the length of the `Bytes`.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the `Bytes` is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Creates a new `Bytes` by copying data from a slice.
    ///
    /// The copy is always an ordinary buffer, even when `data` belongs to an
    /// attached one.
    pub fn copy_from_slice(data: &[u8]) -> Bytes {
        Bytes(Buffer::copy_from_slice(data))
    }

    /// Returns the buffer contents as a byte slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Returns the raw data pointer; null for an empty buffer that holds no memory.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    /// Creates a new `Bytes` by slicing the current `Bytes` within the given range.
    ///
    /// This operation is zero-copy; it does not allocate new memory. The result is
    /// a plain view: it only resolves to the same payload when it starts at the
    /// same data pointer. Use [`attachment::slice`] to carry the payload over.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Bytes {
        Bytes(self.0.slice(range))
    }

    /// Consumes the `Bytes` and returns the underlying `Buffer`.
    pub fn into_inner(self) -> Buffer {
        self.0
    }

    #[inline]
    pub(crate) fn buffer(&self) -> &Buffer {
        &self.0
    }
}

impl std::ops::Deref for Bytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for Bytes {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Borrow<[u8]> for Bytes {
    #[inline]
    fn borrow(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Default for Bytes {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Bytes) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Bytes {}

impl PartialEq<[u8]> for Bytes {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_slice() == other
    }
}

impl PartialEq<&[u8]> for Bytes {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_slice() == *other
    }
}

impl PartialEq<str> for Bytes {
    fn eq(&self, other: &str) -> bool {
        self.as_slice() == other.as_bytes()
    }
}

impl PartialEq<&str> for Bytes {
    fn eq(&self, other: &&str) -> bool {
        self.as_slice() == other.as_bytes()
    }
}

impl PartialOrd for Bytes {
    fn partial_cmp(&self, other: &Bytes) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bytes {
    fn cmp(&self, other: &Bytes) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl Hash for Bytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl From<Buffer> for Bytes {
    fn from(buf: Buffer) -> Self {
        Bytes(buf)
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(vec: Vec<u8>) -> Self {
        Bytes::copy_from_slice(&vec)
    }
}

impl From<String> for Bytes {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Self::copy_from_slice(s.as_bytes())
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self::copy_from_slice(s)
    }
}
