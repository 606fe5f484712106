//! Search Engine
//!
//! Exact-match and boundary lookups over tuple views sorted by key.
//!
//! ## Result convention
//!
//! Every search reports **absolute element positions** in the caller's flat
//! array (for single-field tuples these coincide with tuple indices):
//!
//! - a hit returns the position of the matching tuple (`>= 0`);
//! - a miss returns a negative code built with
//!   [`encode_search_miss`](crate::tuple::encode_search_miss) from the
//!   position of the first tuple whose key exceeds the search key, or from
//!   `to - S` when every key is smaller.
//!
//! [`linear_search`] and [`binary_search`] produce identical results on
//! every sorted view. When keys repeat, both return the first matching
//! position.
//!
//! ## Hybrid search
//!
//! [`binary_search`] bisects only while more than [`LINEAR_SEARCH_CUTOFF`]
//! candidates remain and then scans. The cutoff is a performance knob that
//! trades branch mispredictions against scan length; any positive value
//! yields the same results.


use crate::tuple::{TupleError, TupleView, encode_search_miss};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Number of remaining candidates below which bisection hands over to a
/// linear scan.
pub const LINEAR_SEARCH_CUTOFF: usize = 32;

// ------------------------------------------------------------------------------------------------
// Generic searches
// ------------------------------------------------------------------------------------------------

/// Scans `view` front to back for `key`.
pub fn linear_search<const S: usize>(key: i64, view: TupleView<'_, S>) -> i64 {
    scan_from(key, view, 0)
}

/// Bisects `view` down to [`LINEAR_SEARCH_CUTOFF`] candidates, then scans.
pub fn binary_search<const S: usize>(key: i64, view: TupleView<'_, S>) -> i64 {
    let mut low = 0usize;
    let mut high = view.len();

    // Invariant: keys before `low` are < key, keys at or after `high` are >= key.
    while high - low > LINEAR_SEARCH_CUTOFF {
        let mid = low + (high - low) / 2;
        if view.key(mid) < key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    scan_from(key, view, low)
}

/// Position of the first element `>= key`, or `view.end()` if there is none.
///
/// Never returns a miss code: the result always lies in
/// `[view.base(), view.end()]`.
pub fn upper_bound(key: i64, view: TupleView<'_, 1>) -> usize {
    let mut low = 0usize;
    let mut high = view.len();

    // Invariant: keys before `low` are < key, the key at `high` (if any) is >= key.
    while high - low > LINEAR_SEARCH_CUTOFF {
        let mid = low + (high - low) / 2;
        if view.key(mid) < key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    while low < high && view.key(low) < key {
        low += 1;
    }
    view.position(low)
}

fn scan_from<const S: usize>(key: i64, view: TupleView<'_, S>, start: usize) -> i64 {
    for i in start..view.len() {
        let k = view.key(i);
        if k == key {
            return view.position(i) as i64;
        }
        if k > key {
            return encode_search_miss(S, view.position(i) as i64);
        }
    }
    encode_search_miss(S, view.end() as i64 - S as i64)
}

// ------------------------------------------------------------------------------------------------
// Arity-named entry points
// ------------------------------------------------------------------------------------------------

/// Linear search over single-field tuples in `[from, to)`.
pub fn linear_search_64(key: i64, data: &[i64], from: usize, to: usize) -> Result<i64, TupleError> {
    Ok(linear_search(key, TupleView::<1>::range(data, from, to)?))
}

/// Linear search over two-field tuples in `[from, to)`.
pub fn linear_search_128(key: i64, data: &[i64], from: usize, to: usize) -> Result<i64, TupleError> {
    Ok(linear_search(key, TupleView::<2>::range(data, from, to)?))
}

/// Linear search over three-field tuples in `[from, to)`.
pub fn linear_search_192(key: i64, data: &[i64], from: usize, to: usize) -> Result<i64, TupleError> {
    Ok(linear_search(key, TupleView::<3>::range(data, from, to)?))
}

/// Hybrid binary search over single-field tuples in `[from, to)`.
pub fn binary_search_64(key: i64, data: &[i64], from: usize, to: usize) -> Result<i64, TupleError> {
    Ok(binary_search(key, TupleView::<1>::range(data, from, to)?))
}

/// Hybrid binary search over two-field tuples in `[from, to)`.
pub fn binary_search_128(key: i64, data: &[i64], from: usize, to: usize) -> Result<i64, TupleError> {
    Ok(binary_search(key, TupleView::<2>::range(data, from, to)?))
}

/// Hybrid binary search over three-field tuples in `[from, to)`.
pub fn binary_search_192(key: i64, data: &[i64], from: usize, to: usize) -> Result<i64, TupleError> {
    Ok(binary_search(key, TupleView::<3>::range(data, from, to)?))
}

/// First element `>= key` in `[from, to)`, or `to`.
pub fn upper_bound_64(key: i64, data: &[i64], from: usize, to: usize) -> Result<usize, TupleError> {
    Ok(upper_bound(key, TupleView::<1>::range(data, from, to)?))
}
