//! Storage blocks and the header that precedes their data.
//!
//! Every non-empty buffer is a view into a single heap block laid out as
//! `[Header][data...]`. The header holds the block's reference count and size,
//! the opaque payload slot and, as its last field, the checksum. Ordinary blocks
//! leave the checksum at zero, which never authenticates.
//!
//! A buffer is attachment-bearing when the memory at `ptr - HEADER_SIZE` (or at
//! `ptr` itself for an empty buffer) interpreted as a `Header` carries a checksum
//! equal to [`make_checksum`] of `ptr`. Because the checksum is the last header
//! field, the check for a non-empty buffer only ever reads the eight bytes right
//! before the data pointer, which are either immutable data bytes or the
//! immutable checksum slot of the block's own header.
//!
//! The checksum authenticates the shape of the memory, not its provenance:
//! foreign data bytes that happen to hold `make_checksum(ptr)` at an aligned
//! candidate address are indistinguishable from a genuine header.

use std::{
    alloc::{Layout, alloc, alloc_zeroed, dealloc, handle_alloc_error},
    any::Any,
    cell::UnsafeCell,
    mem::{align_of, offset_of, size_of},
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{self, AtomicUsize, Ordering},
    },
};

/// The opaque, shared value attached to a buffer.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Size of the header that precedes the data of every storage block.
pub const HEADER_SIZE: usize = size_of::<Header>();

/// Alignment of every storage block.
pub const HEADER_ALIGNMENT: usize = align_of::<Header>();

const CHECKSUM_OFFSET: usize = offset_of!(Header, checksum);

const CHECKSUM_MASK: u64 = 0x0cfb_6b2d_a518_bead;

const MAX_REFCOUNT: usize = isize::MAX as usize;

const _: () = assert!(CHECKSUM_OFFSET + size_of::<u64>() == HEADER_SIZE);

/// The fixed-size record at the start of every storage block.
#[repr(C)]
pub struct Header {
    refs: AtomicUsize,
    /// Total block size in bytes, header included.
    size: usize,
    payload: UnsafeCell<Option<Payload>>,
    checksum: u64,
}

impl Header {
    /// Returns a clone of the stored payload.
    #[inline]
    pub fn payload(&self) -> Option<Payload> {
        unsafe { (*self.payload.get()).clone() }
    }

    /// Overwrites the stored payload, dropping the previous one.
    ///
    /// # Safety
    ///
    /// No other thread may read or replace the payload of this header
    /// for the duration of the call.
    #[inline]
    pub unsafe fn set_payload(&self, payload: Option<Payload>) {
        unsafe {
            *self.payload.get() = payload;
        }
    }

    /// Total size of the block governed by this header.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.size
    }
}

/// Computes the checksum of the header governing the buffer that starts at `ptr`.
#[inline]
pub fn make_checksum(ptr: *const u8) -> u64 {
    (ptr as usize as u64) ^ CHECKSUM_MASK
}

/// Locates and authenticates the header of the buffer `(ptr, len)`.
///
/// Returns `None` for a null pointer, on checksum mismatch, and when the
/// candidate address is not aligned for `Header`.
///
/// # Safety
///
/// `ptr` must be null or come from a live buffer whose block guarantees that
/// the candidate checksum slot is readable: for `len > 0` the eight bytes before
/// `ptr` belong to the same block, and for `len == 0` a whole header starts at
/// `ptr`.
pub(crate) unsafe fn resolve<'a>(ptr: *const u8, len: usize) -> Option<&'a Header> {
    if ptr.is_null() {
        return None;
    }

    let candidate = if len == 0 {
        ptr
    } else {
        ptr.wrapping_sub(HEADER_SIZE)
    };

    let slot = unsafe {
        std::slice::from_raw_parts(candidate.wrapping_add(CHECKSUM_OFFSET), size_of::<u64>())
    };
    let checksum: u64 = bytemuck::pod_read_unaligned(slot);
    if checksum != make_checksum(ptr) {
        return None;
    }

    if !(candidate as usize).is_multiple_of(HEADER_ALIGNMENT) {
        return None;
    }

    Some(unsafe { &*(candidate as *const Header) })
}

/// An owning, reference-counted handle to a storage block.
pub(crate) struct BlockRef(NonNull<Header>);

unsafe impl Send for BlockRef {}

unsafe impl Sync for BlockRef {}

impl BlockRef {
    /// Allocates a block of `size` bytes, header included, with an unsealed header.
    ///
    /// The data region is zero-filled when `zeroed` is set and uninitialized
    /// otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than the header or does not form a valid layout.
    pub fn allocate(size: usize, zeroed: bool) -> BlockRef {
        assert!(size >= HEADER_SIZE);
        let layout = block_layout(size);
        let ptr = unsafe {
            if zeroed {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };
        let header = ptr.cast::<Header>();
        unsafe {
            header.write(Header {
                refs: AtomicUsize::new(1),
                size,
                payload: UnsafeCell::new(None),
                checksum: 0,
            });
        }
        BlockRef(header)
    }

    /// Address of the header, which is also the start of the block.
    #[inline]
    pub fn header_ptr(&self) -> *mut u8 {
        self.0.as_ptr().cast()
    }

    /// Address of the first byte after the header.
    #[inline]
    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { self.header_ptr().add(HEADER_SIZE) }
    }

    /// Number of data bytes available after the header.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.header().size - HEADER_SIZE
    }

    #[inline]
    pub fn header(&self) -> &Header {
        unsafe { self.0.as_ref() }
    }

    /// Stores `payload` and the checksum authenticating the buffer that starts at `data`.
    ///
    /// Must only be called on a freshly allocated block that hasn't been shared yet.
    pub fn seal(&mut self, data: *const u8, payload: Payload) {
        let header = unsafe { self.0.as_mut() };
        debug_assert_eq!(header.refs.load(Ordering::Relaxed), 1);
        *header.payload.get_mut() = Some(payload);
        header.checksum = make_checksum(data);
    }
}

impl Clone for BlockRef {
    #[inline]
    fn clone(&self) -> BlockRef {
        let old = self.header().refs.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
        BlockRef(self.0)
    }
}

impl Drop for BlockRef {
    #[inline]
    fn drop(&mut self) {
        if self.header().refs.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);
        unsafe { release(self.0) }
    }
}

/// Drops the stored payload and frees the block.
///
/// # Safety
///
/// The caller must hold the last reference to the block.
#[cold]
unsafe fn release(header: NonNull<Header>) {
    let (size, tagged) = unsafe {
        let h = header.as_ref();
        (h.size, (*h.payload.get()).is_some())
    };
    if tagged {
        log::trace!("releasing tagged block of {size} bytes");
    }
    unsafe {
        std::ptr::drop_in_place(header.as_ptr());
        dealloc(header.as_ptr().cast(), block_layout(size));
    }
}

#[inline]
fn block_layout(size: usize) -> Layout {
    Layout::from_size_align(size, HEADER_ALIGNMENT).expect("block layout")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_SIZE % HEADER_ALIGNMENT, 0);
        assert_eq!(CHECKSUM_OFFSET, HEADER_SIZE - 8);
        assert!(HEADER_ALIGNMENT >= align_of::<u64>());
    }

    #[test]
    fn test_checksum_depends_on_address() {
        let a = make_checksum(0x1000 as *const u8);
        let b = make_checksum(0x1008 as *const u8);
        assert_ne!(a, b);
        assert_eq!(a ^ b, 0x1000 ^ 0x1008);
        assert_eq!(make_checksum(std::ptr::null()), CHECKSUM_MASK);
    }

    #[test]
    fn test_unsealed_block_does_not_resolve() {
        let block = BlockRef::allocate(HEADER_SIZE + 16, true);
        assert_eq!(block.capacity(), 16);
        assert!(unsafe { resolve(block.data_ptr(), 16) }.is_none());
        assert!(unsafe { resolve(std::ptr::null(), 0) }.is_none());
    }

    #[test]
    fn test_sealed_block_resolves() {
        let mut block = BlockRef::allocate(HEADER_SIZE + 16, true);
        let data = block.data_ptr();
        block.seal(data, Arc::new(42u32));

        let header = unsafe { resolve(data, 16) }.expect("header");
        assert_eq!(header.block_size(), HEADER_SIZE + 16);
        let payload = header.payload().expect("payload");
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));

        // The same block viewed from a shifted pointer is not authenticated.
        assert!(unsafe { resolve(data.wrapping_add(1), 15) }.is_none());
    }

    #[test]
    fn test_bare_header_block_resolves_at_its_own_address() {
        let mut block = BlockRef::allocate(HEADER_SIZE, true);
        let ptr = block.header_ptr();
        block.seal(ptr, Arc::new("empty"));
        assert!(unsafe { resolve(ptr, 0) }.is_some());
        assert_eq!(block.capacity(), 0);
    }

    #[test]
    fn test_last_reference_releases_payload() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut block = BlockRef::allocate(HEADER_SIZE + 8, false);
        let data = block.data_ptr();
        block.seal(data, Arc::new(DropFlag(flag.clone())));

        let clone = block.clone();
        drop(block);
        assert!(!flag.load(Ordering::SeqCst));
        drop(clone);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_set_payload_drops_previous() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut block = BlockRef::allocate(HEADER_SIZE + 8, false);
        let data = block.data_ptr();
        block.seal(data, Arc::new(DropFlag(flag.clone())));

        unsafe { block.header().set_payload(Some(Arc::new(1u8))) };
        assert!(flag.load(Ordering::SeqCst));
        let payload = block.header().payload().expect("payload");
        assert_eq!(payload.downcast_ref::<u8>(), Some(&1));
    }
}
