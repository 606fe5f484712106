//! Search miss encoding.
//!
//! A search returns a single `i64`: a non-negative value is the element
//! position of an exact match, a negative value is a *miss code* carrying the
//! insertion point.
//!
//! ```text
//! encode(s, p) = -s - max(0, p)
//! decode(s, v) = -v - s
//! ```
//!
//! Offsetting by the stride keeps every miss strictly negative, even for an
//! insertion point of 0, whatever the arity. Scans that stop before touching
//! a single candidate compute `p = to - s`, which may be negative; the clamp
//! maps those to insertion point 0.

/// Encodes a failed search ending at element position `pos`.
#[inline]
pub fn encode_search_miss(stride: usize, pos: i64) -> i64 {
    -(stride as i64) - pos.max(0)
}

/// Recovers the (clamped) insertion point from a miss code.
#[inline]
pub fn decode_search_miss(stride: usize, code: i64) -> i64 {
    -code - stride as i64
}

/// Decoded result of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Exact match at this element position.
    Found(usize),

    /// No match; the search stopped at this element position.
    Missing {
        /// Clamped insertion point, in elements.
        insertion_point: usize,
    },
}

impl SearchOutcome {
    /// Interprets a raw search result produced with the given stride.
    pub fn from_code(stride: usize, code: i64) -> Self {
        if code >= 0 {
            Self::Found(code as usize)
        } else {
            Self::Missing {
                insertion_point: decode_search_miss(stride, code) as usize,
            }
        }
    }

    /// Returns `true` for an exact match.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The match position or the insertion point.
    pub fn position(&self) -> usize {
        match self {
            Self::Found(pos) => *pos,
            Self::Missing { insertion_point } => *insertion_point,
        }
    }
}
