//! Tuple View Module
//!
//! Zero-copy projection of a flat `i64` array into fixed-arity tuples.
//!
//! ## Design Overview
//!
//! The columnar store hands this layer plain `i64` pages. Logically, each page
//! is a sequence of tuples of arity `S ∈ {1, 2, 3}`: tuple `i` occupies the
//! elements `[i·S, i·S + S)`. Only the **first** field is ever compared; the
//! remaining fields are payload and are moved along with their key, bit for
//! bit.
//!
//! All bounds handed to this module are measured in **elements** of the flat
//! array, never in tuples. A view remembers the absolute element offset of
//! its first element (its *base*), so that the search engine can report hits
//! and insertion points as positions in the caller's array.
//!
//! # Layout reinterpretation
//!
//! `[i64; S]` has the size of `S` consecutive `i64` values and the alignment
//! of `i64`, so any `[i64]` slice whose length is a multiple of `S` is also a
//! valid `[[i64; S]]` slice. [`TupleView::as_tuples`] and
//! [`TupleViewMut::as_tuples_mut`] are the only places in the crate that rely
//! on this; every algorithm above them is safe, arity-generic code.
//!
//! # Sub-modules
//!
//! - [`codec`] — the stride-aware search miss encoding.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod codec;


pub use codec::{SearchOutcome, decode_search_miss, encode_search_miss};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::slice;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned when a flat array range cannot be viewed as tuples.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TupleError {
    /// The requested element range does not fit inside the array.
    #[error("range [{start}, {end}) out of bounds for array of {len} elements")]
    OutOfBounds {
        /// First element of the requested range.
        start: usize,
        /// One past the last element of the requested range.
        end: usize,
        /// Length of the underlying array.
        len: usize,
    },

    /// The range length is not a whole number of tuples.
    #[error("range of {len} elements is not a multiple of stride {stride}")]
    Misaligned {
        /// Length of the requested range in elements.
        len: usize,
        /// Tuple arity.
        stride: usize,
    },

    /// The output buffer cannot hold another tuple.
    #[error("output buffer of {capacity} elements cannot hold {required} elements")]
    OutputTooSmall {
        /// Capacity of the output buffer in elements.
        capacity: usize,
        /// Elements needed to complete the current write.
        required: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Range validation
// ------------------------------------------------------------------------------------------------

/// Compile-time guard on the tuple arity.
struct Stride<const S: usize>;

impl<const S: usize> Stride<S> {
    const VALID: () = assert!(S >= 1 && S <= 3, "tuple stride must be 1, 2 or 3");
}

fn check_range<const S: usize>(len: usize, start: usize, end: usize) -> Result<(), TupleError> {
    let () = Stride::<S>::VALID;

    if start > end || end > len {
        return Err(TupleError::OutOfBounds { start, end, len });
    }
    if (end - start) % S != 0 {
        return Err(TupleError::Misaligned {
            len: end - start,
            stride: S,
        });
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TupleView — read-only
// ------------------------------------------------------------------------------------------------

/// Read-only view of `[start, end)` of a flat array as tuples of arity `S`.
#[derive(Debug, Clone, Copy)]
pub struct TupleView<'a, const S: usize> {
    /// Elements of the viewed range (length is a multiple of `S`).
    data: &'a [i64],

    /// Absolute element index of `data[0]` in the caller's array.
    base: usize,
}

impl<'a, const S: usize> TupleView<'a, S> {
    /// Views the whole array.
    pub fn new(data: &'a [i64]) -> Result<Self, TupleError> {
        Self::range(data, 0, data.len())
    }

    /// Views the element range `[start, end)` of `data`.
    ///
    /// # Errors
    ///
    /// - [`TupleError::OutOfBounds`] if the range does not fit in `data`.
    /// - [`TupleError::Misaligned`] if `end - start` is not a multiple of `S`.
    pub fn range(data: &'a [i64], start: usize, end: usize) -> Result<Self, TupleError> {
        check_range::<S>(data.len(), start, end)?;
        Ok(Self {
            data: &data[start..end],
            base: start,
        })
    }

    /// Number of tuples in the view.
    pub fn len(&self) -> usize {
        self.data.len() / S
    }

    /// Returns `true` if the view holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of elements in the view.
    pub fn len_elements(&self) -> usize {
        self.data.len()
    }

    /// Absolute element index of the first element.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Absolute element index one past the last element.
    pub fn end(&self) -> usize {
        self.base + self.data.len()
    }

    /// Key (first field) of tuple `i`.
    #[inline]
    pub fn key(&self, i: usize) -> i64 {
        self.data[i * S]
    }

    /// Tuple `i`, all fields.
    #[inline]
    pub fn tuple(&self, i: usize) -> &'a [i64; S] {
        &self.as_tuples()[i]
    }

    /// Absolute element index at which tuple `i` starts.
    #[inline]
    pub fn position(&self, i: usize) -> usize {
        self.base + i * S
    }

    /// The viewed elements.
    pub fn as_elements(&self) -> &'a [i64] {
        self.data
    }

    /// The viewed range as a slice of tuples.
    pub fn as_tuples(&self) -> &'a [[i64; S]] {
        // SAFETY: `[i64; S]` has the alignment of `i64` and a size of exactly
        // `S` elements, and `data.len()` is a multiple of `S` (checked on
        // construction), so the reinterpreted slice covers the same memory.
        unsafe { slice::from_raw_parts(self.data.as_ptr().cast::<[i64; S]>(), self.len()) }
    }

    /// Iterates over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = i64> + 'a {
        self.as_tuples().iter().map(|t| t[0])
    }
}

// ------------------------------------------------------------------------------------------------
// TupleViewMut — read/write
// ------------------------------------------------------------------------------------------------

/// Mutable view of `[start, end)` of a flat array as tuples of arity `S`.
#[derive(Debug)]
pub struct TupleViewMut<'a, const S: usize> {
    data: &'a mut [i64],
    base: usize,
}

impl<'a, const S: usize> TupleViewMut<'a, S> {
    /// Views the whole array.
    pub fn new(data: &'a mut [i64]) -> Result<Self, TupleError> {
        let len = data.len();
        Self::range(data, 0, len)
    }

    /// Views the element range `[start, end)` of `data`.
    pub fn range(data: &'a mut [i64], start: usize, end: usize) -> Result<Self, TupleError> {
        check_range::<S>(data.len(), start, end)?;
        Ok(Self {
            data: &mut data[start..end],
            base: start,
        })
    }

    /// Number of tuples in the view.
    pub fn len(&self) -> usize {
        self.data.len() / S
    }

    /// Returns `true` if the view holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reborrows as a read-only view.
    pub fn as_view(&self) -> TupleView<'_, S> {
        TupleView {
            data: &*self.data,
            base: self.base,
        }
    }

    /// The viewed range as a mutable slice of tuples.
    pub fn as_tuples_mut(&mut self) -> &mut [[i64; S]] {
        let len = self.len();
        // SAFETY: same layout argument as `TupleView::as_tuples`; the
        // exclusive borrow of `self` guarantees uniqueness.
        unsafe { slice::from_raw_parts_mut(self.data.as_mut_ptr().cast::<[i64; S]>(), len) }
    }
}

// ------------------------------------------------------------------------------------------------
// TupleWriter — bounded output cursor
// ------------------------------------------------------------------------------------------------

/// Appends whole tuples to a caller-provided output buffer.
#[derive(Debug)]
pub struct TupleWriter<'a, const S: usize> {
    out: &'a mut [i64],

    /// Tuples written so far.
    written: usize,
}

impl<'a, const S: usize> TupleWriter<'a, S> {
    /// Creates a writer positioned at the start of `out`.
    pub fn new(out: &'a mut [i64]) -> Self {
        let () = Stride::<S>::VALID;
        Self { out, written: 0 }
    }

    /// Appends one tuple.
    ///
    /// # Errors
    ///
    /// [`TupleError::OutputTooSmall`] if the buffer has no room left; the
    /// buffer is left untouched in that case.
    pub fn push(&mut self, tuple: &[i64; S]) -> Result<(), TupleError> {
        let at = self.written * S;
        if at + S > self.out.len() {
            return Err(TupleError::OutputTooSmall {
                capacity: self.out.len(),
                required: at + S,
            });
        }
        self.out[at..at + S].copy_from_slice(tuple);
        self.written += 1;
        Ok(())
    }

    /// Tuples written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}
