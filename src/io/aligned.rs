//! Heap buffers with a caller-chosen alignment, for direct I/O.

use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use super::{DIRECT_IO_ALIGNMENT, IoError};

/// A zero-initialised byte buffer whose start address is a multiple of
/// `align`.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: `AlignedBuf` uniquely owns its allocation, like `Box<[u8]>`.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocates `len` zeroed bytes aligned to `align`. Alignments below that
    /// of `i64` are raised to it.
    ///
    /// # Errors
    ///
    /// [`IoError::Precondition`] if `align` is not a power of two.
    pub fn zeroed(len: usize, align: usize) -> Result<Self, IoError> {
        let align = align.max(std::mem::align_of::<i64>());
        // Zero-sized layouts cannot be allocated; keep one aligned slot.
        let layout = Layout::from_size_align(len.max(align), align).map_err(|e| {
            IoError::Precondition(format!("invalid buffer layout ({len} bytes, align {align}): {e}"))
        })?;

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        Ok(Self { ptr, len, layout })
    }

    /// Allocates `len` zeroed bytes aligned for direct I/O.
    pub fn for_direct_io(len: usize) -> Result<Self, IoError> {
        Self::zeroed(len, DIRECT_IO_ALIGNMENT)
    }

    /// Alignment of the buffer start.
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Views the buffer as native-endian `i64` elements. Trailing bytes that
    /// do not form a whole element are ignored.
    pub fn as_longs(&self) -> &[i64] {
        // SAFETY: `zeroed` never aligns below `i64`, and the length is
        // rounded down to whole elements.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr().cast::<i64>(), self.len / 8) }
    }

    /// Mutable counterpart of [`AlignedBuf::as_longs`].
    pub fn as_longs_mut(&mut self) -> &mut [i64] {
        // SAFETY: as in `as_longs`, with exclusive access through `&mut self`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<i64>(), self.len / 8) }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` points to at least `len` initialised bytes we own.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`, with exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish_non_exhaustive()
    }
}
