//! # tupleio
//!
//! Low-level primitives for a columnar array store: in-place sort, search
//! and deduplicating merge of fixed-arity `i64` tuples packed in flat
//! arrays, plus batched page reads through interchangeable kernel I/O
//! strategies.
//!
//! ## Quick Start
//!
//! ```rust
//! use tupleio::{merge, search, sort};
//!
//! // Two-field tuples: (key, payload).
//! let mut page = vec![5, 50, 1, 10, 3, 30];
//! sort::sort_128(&mut page, 0, 6).unwrap();
//! assert_eq!(page, [1, 10, 3, 30, 5, 50]);
//!
//! // Hits report the element position of the tuple.
//! assert_eq!(search::binary_search_128(3, &page, 0, 6).unwrap(), 2);
//!
//! // Misses report an encoded insertion point.
//! let miss = search::linear_search_128(4, &page, 0, 6).unwrap();
//! assert!(miss < 0);
//! assert_eq!(tupleio::tuple::decode_search_miss(2, miss), 4);
//!
//! let other = [3, 99, 4, 40];
//! let mut out = vec![0; page.len() + other.len()];
//! let n = merge::merge_128(&mut out, &page, &other).unwrap();
//! assert_eq!(&out[..n * 2], &[1, 10, 3, 30, 4, 40, 5, 50]);
//! ```
//!
//! Reading pages:
//!
//! ```rust,no_run
//! use tupleio::io::{PageReader, ReadRequest};
//! use tupleio::ReaderConfig;
//!
//! let reader = PageReader::open("/tmp/pages.bin", ReaderConfig::default()).unwrap();
//! let mut a = vec![0u8; 4096];
//! let mut b = vec![0u8; 4096];
//! let mut batch = [ReadRequest::new(&mut a, 0), ReadRequest::new(&mut b, 8192)];
//! reader.read(&mut batch).unwrap();
//! ```
//!
//! ## Features
//!
//! - **Arity-generic algorithms**: tuples of 1, 2 or 3 fields, keyed by the
//!   first field, selected at compile time.
//! - **Encoded search misses**: one `i64` carries either a hit or the
//!   insertion point.
//! - **Three I/O backends**: synchronous `pread`, legacy Linux AIO and
//!   io_uring, behind one [`io::BatchRead`] trait.
//! - **Decoupled ring mode**: submit reads tagged with correlation ids and
//!   collect completions later.
//! - **Direct I/O**: aligned buffers and block-coalescing unaligned reads.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod config;
pub mod io;
pub mod merge;
pub mod search;
pub mod sort;
pub mod tuple;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

pub use config::ReaderConfig;
pub use io::{BackendType, IoError, PageReader};
pub use tuple::{SearchOutcome, TupleError, TupleView, TupleViewMut};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

/// Crate-level error, wrapping the per-module error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A tuple range could not be viewed or written.
    #[error("{0}")]
    Tuple(#[from] TupleError),

    /// A batch read failed.
    #[error("{0}")]
    Io(#[from] IoError),
}
