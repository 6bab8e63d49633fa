use std::ops::{Range, RangeBounds};

use crate::header::{self, BlockRef, HEADER_SIZE, Header};

/// `Buffer` represents a contiguous, immutable memory region with shared ownership
/// semantics.
///
/// `Buffers` can be sliced and cloned without copying the underlying data: a clone
/// copies the `(ptr, len)` pair and bumps the reference count of the storage block.
///
/// Every non-empty buffer points into a block that starts with a [`Header`], so at
/// least `HEADER_SIZE` bytes of the same block precede the start of the block's
/// data. An empty buffer either has a null pointer and no block, or points at a
/// bare header block created by the empty-buffer attach path.
#[derive(Clone)]
pub struct Buffer {
    ptr: *const u8,
    len: usize,
    block: Option<BlockRef>,
}

unsafe impl Send for Buffer {}

unsafe impl Sync for Buffer {}

impl Buffer {
    /// Creates a new empty buffer.
    pub const fn new() -> Buffer {
        Buffer {
            ptr: std::ptr::null(),
            len: 0,
            block: None,
        }
    }

    /// Creates a new buffer containing a copy of the provided slice.
    ///
    /// The block header is left unsealed, so the result never carries a payload.
    pub fn copy_from_slice(data: &[u8]) -> Buffer {
        if data.is_empty() {
            return Buffer::new();
        }
        let block = BlockRef::allocate(
            HEADER_SIZE.checked_add(data.len()).expect("add"),
            false,
        );
        let ptr = block.data_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
        Buffer::from_block(block, ptr, data.len())
    }

    /// Wraps `len` initialized bytes at `ptr` inside `block`.
    ///
    /// `ptr` must lie within the block and either be at least `HEADER_SIZE` bytes
    /// past its start, or equal the header address with `len == 0`.
    pub(crate) fn from_block(block: BlockRef, ptr: *const u8, len: usize) -> Buffer {
        debug_assert!(
            (len == 0 && ptr == block.header_ptr().cast_const())
                || (len > 0 && ptr >= block.data_ptr().cast_const())
        );
        Buffer {
            ptr,
            len,
            block: Some(block),
        }
    }

    /// Returns the length of the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the raw data pointer, which is null for an empty ordinary buffer.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Returns a reference to the buffer contents as a byte slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Creates a new buffer representing a subrange of this buffer.
    ///
    /// The returned buffer shares ownership of the underlying memory with the original
    /// buffer. An empty range yields an empty buffer that holds no memory.
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - The start index is greater than the end index
    /// - The end index is greater than the buffer's length
    /// - Either index arithmetic overflows
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Self {
        let range = self.verify_range(range);
        if range.is_empty() {
            return Buffer::new();
        }
        self.make_slice(range)
    }

    /// Locates the header authenticated by this buffer's data pointer.
    #[inline]
    pub(crate) fn header(&self) -> Option<&Header> {
        debug_assert_eq!(self.ptr.is_null(), self.block.is_none());
        unsafe { header::resolve(self.ptr, self.len) }
    }

    /// Total size of the storage block, header included.
    #[cfg(test)]
    pub(crate) fn block_size(&self) -> Option<usize> {
        self.block.as_ref().map(|block| block.header().block_size())
    }
}

impl Buffer {
    /// Verifies that the given range is valid for this buffer.
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - The start index is greater than the end index
    /// - The end index is greater than the buffer's length
    /// - Index calculation results in arithmetic overflow
    fn verify_range(&self, range: impl RangeBounds<usize>) -> Range<usize> {
        use core::ops::Bound;

        let len = self.len();

        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n.checked_add(1).expect("out of range"),
            Bound::Unbounded => 0,
        };

        let end = match range.end_bound() {
            Bound::Included(&n) => n.checked_add(1).expect("out of range"),
            Bound::Excluded(&n) => n,
            Bound::Unbounded => len,
        };

        assert!(
            start <= end,
            "range start must not be greater than end: {:?} <= {:?}",
            start,
            end,
        );
        assert!(
            end <= len,
            "range end out of bounds: {:?} <= {:?}",
            end,
            len,
        );

        start..end
    }

    fn make_slice(&self, range: Range<usize>) -> Buffer {
        debug_assert!(!range.is_empty());
        let ptr = unsafe { self.ptr.add(range.start) };
        Buffer {
            ptr,
            len: range.end - range.start,
            block: self.block.clone(),
        }
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_slice().fmt(f)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_new() {
        let buf = Buffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.as_slice(), &[]);
        assert!(buf.as_ptr().is_null());
        assert!(buf.header().is_none());
    }

    #[test]
    fn test_buffer_copy_from_slice() {
        let data = vec![1, 2, 3, 4, 5];
        let buf = Buffer::copy_from_slice(&data);
        assert_eq!(buf.len(), data.len());
        assert_eq!(buf.as_slice(), &data);
        assert_eq!(buf.block_size(), Some(HEADER_SIZE + data.len()));
        assert!(buf.header().is_none());
    }

    #[test]
    fn test_buffer_copy_from_empty_slice() {
        let buf = Buffer::copy_from_slice(&[]);
        assert!(buf.is_empty());
        assert!(buf.as_ptr().is_null());
        assert_eq!(buf.block_size(), None);
    }

    #[test]
    fn test_buffer_slice() {
        let data = vec![1, 2, 3, 4, 5];
        let buf = Buffer::copy_from_slice(&data);

        let slice1 = buf.slice(1..4);
        assert_eq!(slice1.as_slice(), &[2, 3, 4]);

        let slice2 = buf.slice(..3);
        assert_eq!(slice2.as_slice(), &[1, 2, 3]);

        let slice3 = buf.slice(3..);
        assert_eq!(slice3.as_slice(), &[4, 5]);

        let slice4 = buf.slice(..);
        assert_eq!(slice4.as_slice(), &data);

        let slice5 = buf.slice(2..=2);
        assert_eq!(slice5.as_slice(), &[3]);
    }

    #[test]
    fn test_buffer_empty_slice_holds_no_memory() {
        let buf = Buffer::copy_from_slice(&[1, 2, 3]);
        for i in 0..=buf.len() {
            let empty = buf.slice(i..i);
            assert!(empty.is_empty());
            assert!(empty.as_ptr().is_null());
            assert_eq!(empty.block_size(), None);
        }
    }

    #[test]
    #[should_panic(expected = "range end out of bounds")]
    fn test_buffer_slice_out_of_bounds() {
        let buf = Buffer::copy_from_slice(&[1, 2, 3]);
        buf.slice(1..4);
    }

    #[test]
    #[should_panic(expected = "range start must not be greater than end")]
    fn test_buffer_slice_invalid_range() {
        let buf = Buffer::copy_from_slice(&[1, 2, 3]);
        buf.slice(Range { start: 2, end: 1 });
    }

    #[test]
    fn test_buffer_clone() {
        let original = Buffer::copy_from_slice(&[1, 2, 3]);
        let cloned = original.clone();

        assert_eq!(original.as_slice(), cloned.as_slice());
        assert_eq!(original.len(), cloned.len());

        assert_eq!(original.ptr, cloned.ptr);
    }

    #[test]
    fn test_buffer_outlives_original() {
        let slice = {
            let buf = Buffer::copy_from_slice(b"hello world");
            buf.slice(6..)
        };
        assert_eq!(slice.as_slice(), b"world");
    }

    #[test]
    fn test_buffer_deref() {
        let data = vec![1, 2, 3];
        let buf = Buffer::copy_from_slice(&data);

        let slice: &[u8] = &buf;
        assert_eq!(slice, &data);
    }

    #[test]
    fn test_buffer_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
    }

    #[test]
    fn test_foreign_subranges_are_not_attached() {
        let data = (0..=255u8).collect::<Vec<_>>();
        let buf = Buffer::copy_from_slice(&data);
        for start in 0..data.len() {
            assert!(buf.slice(start..).header().is_none());
            assert!(buf.slice(..start + 1).header().is_none());
        }
    }
}
