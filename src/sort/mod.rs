//! Sort Engine
//!
//! In-place ordering of a tuple range by its first field.
//!
//! The range is reinterpreted as `[[i64; S]]` and sorted with the standard
//! library's unstable pattern-defeating quicksort: no allocation, and whole
//! tuples move together so payload fields stay attached to their key. Tuples
//! with equal keys may be permuted.


use crate::tuple::{TupleError, TupleView, TupleViewMut};

// ------------------------------------------------------------------------------------------------
// Generic entry points
// ------------------------------------------------------------------------------------------------

/// Sorts the tuples in the element range `[start, end)` of `data` by key.
///
/// # Errors
///
/// Returns a [`TupleError`] if the range is out of bounds or not a whole
/// number of tuples. `data` is untouched in that case.
pub fn sort<const S: usize>(data: &mut [i64], start: usize, end: usize) -> Result<(), TupleError> {
    let mut view = TupleViewMut::<S>::range(data, start, end)?;
    sort_view(&mut view);
    Ok(())
}

/// Sorts every tuple of `view` by key.
pub fn sort_view<const S: usize>(view: &mut TupleViewMut<'_, S>) {
    view.as_tuples_mut().sort_unstable_by_key(|t| t[0]);
}

/// Returns `true` if the keys of `view` are non-decreasing.
pub fn is_sorted<const S: usize>(view: TupleView<'_, S>) -> bool {
    view.as_tuples().windows(2).all(|w| w[0][0] <= w[1][0])
}

// ------------------------------------------------------------------------------------------------
// Arity-named entry points
// ------------------------------------------------------------------------------------------------

/// Sorts single-field tuples in `[start, end)`.
pub fn sort_64(data: &mut [i64], start: usize, end: usize) -> Result<(), TupleError> {
    sort::<1>(data, start, end)
}

/// Sorts two-field tuples in `[start, end)`.
pub fn sort_128(data: &mut [i64], start: usize, end: usize) -> Result<(), TupleError> {
    sort::<2>(data, start, end)
}

/// Sorts three-field tuples in `[start, end)`.
pub fn sort_192(data: &mut [i64], start: usize, end: usize) -> Result<(), TupleError> {
    sort::<3>(data, start, end)
}
