//! # Page Reader
//!
//! A thread-safe front-end that reads pages of one file through a pool of
//! backends.
//!
//! ## Design Overview
//!
//! [`PageReader::open`] opens the file and builds `ring_count` backends of
//! the configured [`BackendType`](super::BackendType) (rings register the
//! file as fixed descriptor 0). The backends live in a lock-free
//! `crossbeam` [`ArrayQueue`]. Each [`PageReader::read`] leases one backend,
//! spinning with [`Backoff`] while all are busy, and returns it when the
//! batch is done. A single backend is therefore only ever driven by one
//! thread, while the reader itself is `Send + Sync`.
//!
//! A backend that reports itself unhealthy (a poisoned ring) is dropped on
//! return and a fresh one of the same type takes its slot. If that cannot
//! be built, the slot falls back to synchronous reads.
//!
//! Batches below `small_batch_threshold` requests skip the pool and use
//! plain `pread`; the submission overhead of a ring or AIO context does not
//! pay off for a handful of reads.
//!
//! ## Unaligned reads
//!
//! [`PageReader::read_unaligned`] reads arbitrary `(offset, size)` ranges.
//! On a direct-I/O file it first widens every range to whole
//! `block_size` blocks, merges adjacent blocks into single reads into one
//! aligned allocation, and then exposes each requested range as a slice of
//! that allocation ([`UnalignedRead`]).

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::os::fd::AsFd;
use std::path::Path;

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;
use tracing::{debug, error, info, trace, warn};

use super::{
    AlignedBuf, BatchRead, DIRECT_IO_ALIGNMENT, DataFile, IoError, OpenMode, ReadRequest,
    SyncReader, split_requests,
};
use crate::Error;
use crate::config::ReaderConfig;

// ------------------------------------------------------------------------------------------------
// PageReader
// ------------------------------------------------------------------------------------------------

pub(crate) type PooledBackend = Box<dyn BatchRead + Send>;

/// Pooled batch reader over one file. See the [module docs](self).
pub struct PageReader {
    /// Dropped before `file`: registered rings must close first.
    pool: ArrayQueue<PooledBackend>,
    file: DataFile,
    config: ReaderConfig,
}

impl std::fmt::Debug for PageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReader")
            .field("file", &self.file)
            .field("config", &self.config)
            .field("idle_backends", &self.pool.len())
            .finish()
    }
}

impl PageReader {
    /// Opens `path` read-only and builds the backend pool.
    ///
    /// Buffered files are advised for random access (`POSIX_FADV_RANDOM`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for an out-of-range configuration,
    /// [`Error::Io`] if the file cannot be opened or a backend cannot be
    /// set up.
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self, Error> {
        config.validate()?;

        let mode = if config.direct {
            OpenMode::Direct
        } else {
            OpenMode::Buffered
        };
        let file = DataFile::open(path, mode)?;
        if mode == OpenMode::Buffered {
            file.fadvise_random()?;
        }

        let pool = ArrayQueue::new(config.ring_count);
        for _ in 0..config.ring_count {
            let backend = config
                .backend
                .build(config.queue_depth, Some(file.as_fd()))?;
            let pushed = pool.push(backend);
            debug_assert!(pushed.is_ok(), "backend pool holds exactly ring_count backends");
        }

        info!(
            path = %file.path().display(),
            backend = ?config.backend,
            direct = config.direct,
            ring_count = config.ring_count,
            queue_depth = config.queue_depth,
            "page reader opened"
        );

        Ok(Self { pool, file, config })
    }

    /// The underlying file.
    pub fn file(&self) -> &DataFile {
        &self.file
    }

    /// The configuration the reader was opened with.
    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Advises the kernel that the whole file will be needed soon.
    pub fn fadvise_willneed(&self) -> Result<(), IoError> {
        self.file.fadvise_willneed()
    }

    /// Fills every request from the file. Returns the number of requests.
    ///
    /// Batches of at least `queue_depth` requests are split by the backend.
    ///
    /// # Errors
    ///
    /// Whatever the serving backend reports; see [`BatchRead`]. Buffers may
    /// be partially written on failure.
    pub fn read(&self, requests: &mut [ReadRequest<'_>]) -> Result<usize, IoError> {
        if requests.len() < self.config.small_batch_threshold {
            trace!(count = requests.len(), "small batch served synchronously");
            return SyncReader::new().read_batch(&self.file, requests);
        }

        let mut lease = self.lease();
        lease.backend.read_batch(&self.file, requests)
    }

    /// Reads the ranges `offsets[i]..offsets[i] + sizes[i]`.
    ///
    /// Buffered files read each range into its own slice of one buffer.
    /// Direct files read the covering `block_size`-aligned blocks instead;
    /// `block_size` must then be a non-zero multiple of
    /// [`DIRECT_IO_ALIGNMENT`], and any block that reaches past the end of
    /// the file must be backed by padding, or the read fails as short.
    ///
    /// # Errors
    ///
    /// [`IoError::Precondition`] if `offsets` and `sizes` differ in length or
    /// `block_size` is unusable; otherwise as [`PageReader::read`].
    pub fn read_unaligned(
        &self,
        offsets: &[u64],
        sizes: &[usize],
        block_size: usize,
    ) -> Result<UnalignedRead, IoError> {
        if offsets.len() != sizes.len() {
            return Err(IoError::Precondition(format!(
                "{} offsets but {} sizes",
                offsets.len(),
                sizes.len()
            )));
        }

        match self.file.mode() {
            OpenMode::Buffered => self.read_ranges(offsets, sizes),
            OpenMode::Direct => self.read_blocks(offsets, sizes, block_size),
        }
    }

    fn read_ranges(&self, offsets: &[u64], sizes: &[usize]) -> Result<UnalignedRead, IoError> {
        let total: usize = sizes.iter().sum();
        let mut buf = AlignedBuf::zeroed(total, std::mem::align_of::<i64>())?;

        let mut ranges = Vec::with_capacity(sizes.len());
        let mut shapes = Vec::with_capacity(sizes.len());
        let mut cursor = 0usize;
        for (&offset, &size) in offsets.iter().zip(sizes) {
            ranges.push(cursor..cursor + size);
            cursor += size;
            if size > 0 {
                shapes.push((offset, size));
            }
        }

        let mut requests = split_requests(&mut buf, &shapes)?;
        self.read(&mut requests)?;
        drop(requests);

        debug!(ranges = ranges.len(), bytes = total, "unaligned buffered read");
        Ok(UnalignedRead { buf, ranges })
    }

    fn read_blocks(
        &self,
        offsets: &[u64],
        sizes: &[usize],
        block_size: usize,
    ) -> Result<UnalignedRead, IoError> {
        if block_size == 0 || block_size % DIRECT_IO_ALIGNMENT != 0 {
            return Err(IoError::Precondition(format!(
                "block size {block_size} is not a non-zero multiple of {DIRECT_IO_ALIGNMENT}"
            )));
        }
        let bs = block_size as u64;

        let mut blocks = BTreeSet::new();
        for (&offset, &size) in offsets.iter().zip(sizes) {
            if size == 0 {
                continue;
            }
            let Some(end) = offset.checked_add(size as u64) else {
                return Err(IoError::Precondition(format!(
                    "{size} bytes at offset {offset} overflow the file offset range"
                )));
            };
            blocks.extend(offset / bs..=(end - 1) / bs);
        }

        // Blocks get consecutive slots in file order, so every range maps to
        // one contiguous stretch of the buffer.
        let slots: BTreeMap<u64, usize> = blocks
            .iter()
            .enumerate()
            .map(|(slot, &block)| (block, slot))
            .collect();

        // (first block, block count) of each run of adjacent blocks.
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for &block in &blocks {
            match runs.last_mut() {
                Some((first, count)) if *first + *count == block => *count += 1,
                _ => runs.push((block, 1)),
            }
        }
        let shapes: Vec<(u64, usize)> = runs
            .iter()
            .map(|&(first, count)| (first * bs, count as usize * block_size))
            .collect();

        let mut buf = AlignedBuf::zeroed(blocks.len() * block_size, block_size)?;
        let mut requests = split_requests(&mut buf, &shapes)?;
        self.read(&mut requests)?;
        drop(requests);

        let ranges = offsets
            .iter()
            .zip(sizes)
            .map(|(&offset, &size)| match slots.get(&(offset / bs)) {
                Some(&slot) if size > 0 => {
                    let start = slot * block_size + (offset % bs) as usize;
                    start..start + size
                }
                _ => 0..0,
            })
            .collect();

        debug!(
            ranges = sizes.len(),
            blocks = blocks.len(),
            reads = shapes.len(),
            "unaligned direct read"
        );
        Ok(UnalignedRead { buf, ranges })
    }

    fn lease(&self) -> Lease<'_> {
        let backoff = Backoff::new();
        loop {
            if let Some(backend) = self.pool.pop() {
                return Lease {
                    reader: self,
                    backend,
                };
            }
            backoff.snooze();
        }
    }

    /// Builds a fresh backend for the slot of `broken`.
    fn rebuild(&self, broken: PooledBackend) -> PooledBackend {
        let kind = broken.backend();
        // Teardown first: a ring drains its in-flight requests on drop.
        drop(broken);

        match self
            .config
            .backend
            .build(self.config.queue_depth, Some(self.file.as_fd()))
        {
            Ok(backend) => {
                warn!(backend = ?kind, "replaced unhealthy backend");
                backend
            }
            Err(e) => {
                error!(backend = ?kind, error = %e, "backend rebuild failed, slot falls back to pread");
                Box::new(SyncReader::new())
            }
        }
    }

    /// Swaps the pooled backends for `backends`.
    #[cfg(test)]
    pub(crate) fn replace_backends(&self, backends: Vec<PooledBackend>) {
        while self.pool.pop().is_some() {}
        for backend in backends {
            let pushed = self.pool.push(backend);
            assert!(pushed.is_ok(), "more backends than ring_count");
        }
    }
}

/// A backend checked out of the pool; returned (or replaced) on drop.
struct Lease<'r> {
    reader: &'r PageReader,
    backend: PooledBackend,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut backend = std::mem::replace(&mut self.backend, Box::new(SyncReader::new()));
        if !backend.is_healthy() {
            backend = self.reader.rebuild(backend);
        }
        // The slot this backend was taken from is still free.
        let pushed = self.reader.pool.push(backend);
        debug_assert!(pushed.is_ok(), "leased backend returned to a full pool");
    }
}

// ------------------------------------------------------------------------------------------------
// UnalignedRead
// ------------------------------------------------------------------------------------------------

/// Result of [`PageReader::read_unaligned`]: one buffer, one slice per
/// requested range.
#[derive(Debug)]
pub struct UnalignedRead {
    buf: AlignedBuf,
    ranges: Vec<Range<usize>>,
}

impl UnalignedRead {
    /// Number of requested ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns `true` if no ranges were requested.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Bytes of range `i`, or `None` if out of bounds.
    pub fn get(&self, i: usize) -> Option<&[u8]> {
        self.ranges.get(i).map(|r| &self.buf[r.clone()])
    }

    /// Bytes of every range, in request order.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.ranges.iter().map(|r| &self.buf[r.clone()])
    }

    /// The backing allocation (block-aligned in direct mode).
    pub fn buffer(&self) -> &AlignedBuf {
        &self.buf
    }
}
