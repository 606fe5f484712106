//! Merge Engine
//!
//! Two-way deduplicating merge of sorted tuple views, used to compact two
//! pages into one.
//!
//! ## Merge rules
//!
//! - **Ties:** when both cursors sit on the same key, the tuple from `a` is
//!   emitted and **both** cursors advance; `b`'s payload is dropped.
//! - **Dedup:** a tuple is emitted only if its key differs from the key of
//!   the last *emitted* tuple (or nothing has been emitted yet). Both inputs
//!   are sorted, so equal keys are always adjacent in the merged stream and
//!   this consecutive-run check removes every duplicate.
//!
//! [`count_distinct`] walks the inputs exactly like [`merge`] without writing
//! anything, so it can size the output buffer for the real merge.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::convert::Infallible;

use crate::sort::is_sorted;
use crate::tuple::{TupleError, TupleView, TupleWriter};

// ------------------------------------------------------------------------------------------------
// Generic entry points
// ------------------------------------------------------------------------------------------------

/// Merges `a` and `b` into `out`, returning the number of tuples written.
///
/// `a.len_elements() + b.len_elements()` elements of output are always
/// enough; `S * count_distinct(a, b)` is the exact requirement.
///
/// # Errors
///
/// [`TupleError::OutputTooSmall`] if `out` fills up; the tuples written so
/// far are left in place.
pub fn merge<const S: usize>(
    out: &mut [i64],
    a: TupleView<'_, S>,
    b: TupleView<'_, S>,
) -> Result<usize, TupleError> {
    debug_assert!(is_sorted(a), "merge input `a` is not sorted");
    debug_assert!(is_sorted(b), "merge input `b` is not sorted");

    let mut writer = TupleWriter::<S>::new(out);
    let mut last: Option<i64> = None;

    merge_walk::<S, TupleError>(a, b, |tuple| {
        if last != Some(tuple[0]) {
            writer.push(tuple)?;
            last = Some(tuple[0]);
        }
        Ok(())
    })?;

    Ok(writer.written())
}

/// Number of distinct keys across `a` and `b`.
pub fn count_distinct<const S: usize>(a: TupleView<'_, S>, b: TupleView<'_, S>) -> usize {
    debug_assert!(is_sorted(a), "count_distinct input `a` is not sorted");
    debug_assert!(is_sorted(b), "count_distinct input `b` is not sorted");

    let mut distinct = 0usize;
    let mut last: Option<i64> = None;

    let Ok(()) = merge_walk::<S, Infallible>(a, b, |tuple| {
        if last != Some(tuple[0]) {
            distinct += 1;
            last = Some(tuple[0]);
        }
        Ok(())
    });

    distinct
}

/// Feeds the merged stream of `a` and `b` to `emit`, resolving ties in
/// favour of `a`.
fn merge_walk<const S: usize, E>(
    a: TupleView<'_, S>,
    b: TupleView<'_, S>,
    mut emit: impl FnMut(&[i64; S]) -> Result<(), E>,
) -> Result<(), E> {
    let a = a.as_tuples();
    let b = b.as_tuples();
    let (mut i, mut j) = (0usize, 0usize);

    while i < a.len() && j < b.len() {
        match a[i][0].cmp(&b[j][0]) {
            Ordering::Less => {
                emit(&a[i])?;
                i += 1;
            }
            Ordering::Greater => {
                emit(&b[j])?;
                j += 1;
            }
            Ordering::Equal => {
                emit(&a[i])?;
                i += 1;
                j += 1;
            }
        }
    }

    for tuple in &a[i..] {
        emit(tuple)?;
    }
    for tuple in &b[j..] {
        emit(tuple)?;
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Arity-named entry points
// ------------------------------------------------------------------------------------------------

/// Merges two sorted single-field arrays.
pub fn merge_64(out: &mut [i64], a: &[i64], b: &[i64]) -> Result<usize, TupleError> {
    merge::<1>(out, TupleView::new(a)?, TupleView::new(b)?)
}

/// Merges two sorted two-field arrays.
pub fn merge_128(out: &mut [i64], a: &[i64], b: &[i64]) -> Result<usize, TupleError> {
    merge::<2>(out, TupleView::new(a)?, TupleView::new(b)?)
}

/// Merges two sorted three-field arrays.
pub fn merge_192(out: &mut [i64], a: &[i64], b: &[i64]) -> Result<usize, TupleError> {
    merge::<3>(out, TupleView::new(a)?, TupleView::new(b)?)
}

/// Distinct keys across two sorted single-field arrays.
pub fn count_distinct_64(a: &[i64], b: &[i64]) -> Result<usize, TupleError> {
    Ok(count_distinct::<1>(TupleView::new(a)?, TupleView::new(b)?))
}

/// Distinct keys across two sorted two-field arrays.
pub fn count_distinct_128(a: &[i64], b: &[i64]) -> Result<usize, TupleError> {
    Ok(count_distinct::<2>(TupleView::new(a)?, TupleView::new(b)?))
}

/// Distinct keys across two sorted three-field arrays.
pub fn count_distinct_192(a: &[i64], b: &[i64]) -> Result<usize, TupleError> {
    Ok(count_distinct::<3>(TupleView::new(a)?, TupleView::new(b)?))
}
