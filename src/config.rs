//! Configuration for [`PageReader`](crate::io::PageReader).

use crate::Error;
use crate::io::BackendType;

/// Largest queue depth the kernel accepts for one ring.
pub const MAX_QUEUE_DEPTH: u32 = 32768;

/// Configuration for a [`PageReader`](crate::io::PageReader).
///
/// All fields have defaults via [`ReaderConfig::default()`]. The
/// configuration is validated when passed to
/// [`PageReader::open`](crate::io::PageReader::open).
///
/// # Example
///
/// ```rust,no_run
/// use tupleio::{BackendType, ReaderConfig};
///
/// let config = ReaderConfig {
///     backend: BackendType::Aio,
///     direct: true,
///     ..ReaderConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Kernel strategy used for batches of `small_batch_threshold` requests
    /// or more.
    ///
    /// Default: [`BackendType::Uring`].
    pub backend: BackendType,

    /// Open the file with `O_DIRECT`, bypassing the page cache.
    ///
    /// Default: `false`.
    pub direct: bool,

    /// Maximum requests submitted to one backend at a time; larger batches
    /// are split.
    ///
    /// Default: 2048. Must be in `1..=32768`.
    pub queue_depth: u32,

    /// Number of pooled backends, i.e. how many threads can read through
    /// the kernel strategy concurrently.
    ///
    /// Default: 8. Must be ≥ 1.
    pub ring_count: usize,

    /// Batches with fewer requests are read with plain `pread` on the
    /// calling thread.
    ///
    /// Default: 5. Zero sends every batch to the pooled backends.
    pub small_batch_threshold: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Uring,
            direct: false,
            queue_depth: 2048,
            ring_count: 8,
            small_batch_threshold: 5,
        }
    }
}

impl ReaderConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig("queue_depth must be >= 1".into()));
        }
        if self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(Error::InvalidConfig(format!(
                "queue_depth must be <= {MAX_QUEUE_DEPTH}"
            )));
        }
        if self.ring_count == 0 {
            return Err(Error::InvalidConfig("ring_count must be >= 1".into()));
        }
        Ok(())
    }
}
