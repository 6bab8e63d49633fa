//! Attaching payloads to buffers and reading them back.
//!
//! [`attach`] returns a byte-for-byte copy of its input whose storage block starts
//! with a sealed header holding the payload. Clones of the result, and plain
//! views that keep its data pointer, read the same payload. A byte copy of the
//! content into a fresh buffer does not.
//!
//! ```
//! use amudai_tagged_bytes::{Bytes, attach_value, detach, is_attached, read_as};
//!
//! let plain = Bytes::from("Hello, world!");
//! let tagged = attach_value(&plain, String::from("greeting"));
//!
//! assert_eq!(plain, tagged);
//! assert!(!is_attached(&plain));
//!
//! let copy = tagged.clone();
//! assert_eq!(read_as::<String>(&copy).unwrap().as_str(), "greeting");
//! assert!(!is_attached(&detach(&tagged)));
//! ```
//!
//! Reading is lock-free and allocation-free. [`replace`] mutates the header in
//! place without synchronization; see its safety contract.

use std::{any::Any, ops::RangeBounds, sync::Arc};

use crate::{
    Bytes,
    buffer::Buffer,
    header::{BlockRef, HEADER_SIZE, Header, Payload},
    size_class::{SizeClass, SizeClasses},
};

/// Returns a copy of `bytes` carrying `payload`.
///
/// The result has the same content and length as `bytes` but lives in a fresh
/// allocation with its own header; `bytes` itself is left untouched, including any
/// payload it already carries. Attaching `None` is equivalent to [`detach`].
pub fn attach(bytes: &Bytes, payload: Option<Payload>) -> Bytes {
    let Some(payload) = payload else {
        return detach(bytes);
    };

    let data = bytes.as_slice();
    if data.is_empty() {
        return attach_empty(payload);
    }

    match SizeClasses::global().lookup(data.len()) {
        Some(class) => attach_small(data, class, payload),
        None => attach_large(data, payload),
    }
}

/// Attaches `value` to a copy of `bytes`.
pub fn attach_value<T>(bytes: &Bytes, value: T) -> Bytes
where
    T: Any + Send + Sync,
{
    attach(bytes, Some(Arc::new(value)))
}

/// Returns the payload attached to `bytes`, if any.
pub fn read(bytes: &Bytes) -> Option<Payload> {
    header_of(bytes)?.payload()
}

/// Returns the payload attached to `bytes` if it is a `T`.
pub fn read_as<T>(bytes: &Bytes) -> Option<Arc<T>>
where
    T: Any + Send + Sync,
{
    read(bytes)?.downcast::<T>().ok()
}

/// Checks whether `bytes` resolves to a header.
///
/// This stays `true` after the payload was replaced with `None`.
pub fn is_attached(bytes: &Bytes) -> bool {
    header_of(bytes).is_some()
}

/// Replaces the payload attached to `bytes` in place.
///
/// The new payload is visible through every buffer resolving to the same header.
/// Returns `false`, without touching anything, when `bytes` is not attached.
/// Unlike [`attach`], replacing with `None` keeps the header.
///
/// # Safety
///
/// The header is not synchronized. For the duration of the call no other thread may
/// [`read`], [`read_as`], [`slice`] or `replace` any buffer that resolves to the same
/// header as `bytes`.
pub unsafe fn replace(bytes: &Bytes, payload: Option<Payload>) -> bool {
    let Some(header) = header_of(bytes) else {
        return false;
    };
    unsafe { header.set_payload(payload) };
    true
}

/// Returns a buffer with the content of `bytes` and no payload.
///
/// An unattached input is returned as is, without copying. An attached input is
/// copied into a fresh ordinary buffer and stays attached itself.
pub fn detach(bytes: &Bytes) -> Bytes {
    if !is_attached(bytes) {
        return bytes.clone();
    }
    Bytes::copy_from_slice(bytes.as_slice())
}

/// Slices `bytes` and carries its payload over to the result.
///
/// When `bytes` has a payload, the subrange is attached to the same payload value;
/// otherwise this is the plain [`Bytes::slice`].
///
/// # Panics
///
/// Panics if the range start is greater than its end, or the end is out of bounds.
pub fn slice(bytes: &Bytes, range: impl RangeBounds<usize>) -> Bytes {
    let sub = bytes.slice(range);
    match read(bytes) {
        Some(payload) => attach(&sub, Some(payload)),
        None => sub,
    }
}

#[inline]
fn header_of(bytes: &Bytes) -> Option<&Header> {
    bytes.buffer().header()
}

/// A bare header: the buffer points at the header itself, with no trailing bytes.
fn attach_empty(payload: Payload) -> Bytes {
    let mut block = BlockRef::allocate(HEADER_SIZE, true);
    let ptr = block.header_ptr();
    block.seal(ptr, payload);
    Buffer::from_block(block, ptr, 0).into()
}

/// Header and data share one block sized exactly to an allocator class.
fn attach_small(data: &[u8], class: &SizeClass, payload: Payload) -> Bytes {
    debug_assert!(class.usable_size() >= data.len());
    let block = class.allocate();
    seal_copy(block, data, payload)
}

/// A dedicated block of exactly `HEADER_SIZE + len` bytes.
fn attach_large(data: &[u8], payload: Payload) -> Bytes {
    let size = HEADER_SIZE.checked_add(data.len()).expect("add");
    log::trace!("attaching payload to large buffer: {} bytes", data.len());
    let block = BlockRef::allocate(size, false);
    seal_copy(block, data, payload)
}

fn seal_copy(mut block: BlockRef, data: &[u8], payload: Payload) -> Bytes {
    let dst = block.data_ptr();
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
    }
    block.seal(dst, payload);
    Buffer::from_block(block, dst, data.len()).into()
}
