//! Batched Page I/O Module
//!
//! Vectorised reads of byte ranges from an open file, through one of three
//! interchangeable kernel strategies.
//!
//! ## Design Overview
//!
//! Every backend implements [`BatchRead`]: it takes a [`DataFile`] and a
//! slice of [`ReadRequest`]s (destination buffer + file offset; the buffer
//! length is the byte count) and either fills **every** buffer completely or
//! fails the whole batch. Backends can therefore be swapped without changing
//! caller code; [`BackendType`] selects one at runtime.
//!
//! | Backend | Type | Strategy |
//! |---|---|---|
//! | Synchronous | [`SyncReader`] | one `pread` per request |
//! | Legacy AIO | [`AioReader`] | `io_submit` the batch, `io_getevents` until drained |
//! | io_uring | [`Ring`] | submission/completion ring, optional fixed-file registration |
//!
//! The ring additionally offers a decoupled submit/poll mode with
//! caller-chosen correlation ids, see [`uring`].
//!
//! # Buffers
//!
//! Requests borrow their destination buffers. Blocking calls never return
//! while the kernel may still write into a buffer: on any failure every
//! submitted request is reaped first.
//!
//! # Direct I/O
//!
//! Files opened with [`OpenMode::Direct`] bypass the page cache. Buffers,
//! offsets and sizes must then be multiples of [`DIRECT_IO_ALIGNMENT`]. The
//! backends check this only in debug builds (also verifying that reads stay
//! inside the file); release builds leave it to the kernel, which reports
//! `EINVAL` at completion time.
//!
//! # Sub-modules
//!
//! - [`file`] — [`DataFile`], open modes and cache hints.
//! - [`aligned`] — [`AlignedBuf`], aligned destination memory.
//! - [`sync`] — [`SyncReader`].
//! - [`aio`] — [`AioReader`].
//! - [`uring`] — [`Ring`], the ring scheduler.
//! - [`reader`] — [`PageReader`], a pooled front-end over any backend.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod aio;
pub mod aligned;
pub mod file;
pub mod reader;
pub mod sync;
pub mod uring;

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

pub use aio::AioReader;
pub use aligned::AlignedBuf;
pub use file::{DataFile, OpenMode, advise_random};
pub use reader::{PageReader, UnalignedRead};
pub use sync::SyncReader;
pub use uring::{Completion, MIN_COMPLETIONS_PER_SUBMIT, Ring, TargetedRead};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::io;
use std::os::fd::BorrowedFd;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Minimum buffer, offset and size granularity for direct I/O.
pub const DIRECT_IO_ALIGNMENT: usize = 512;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Coarse classification of an [`IoError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ring or AIO context allocation/registration failed; the handle is unusable.
    Setup,
    /// Fewer requests were accepted than submitted.
    Submission,
    /// A request was accepted but completed with an error or a short count.
    Completion,
    /// The caller broke a documented precondition.
    Precondition,
    /// Plain I/O error outside the batch protocol (open, stat, fadvise).
    Io,
}

/// Errors returned by the batch I/O backends.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Ring or AIO context setup failed.
    #[error("setup failed: {0}")]
    Setup(#[source] io::Error),

    /// The submission syscall failed before accepting any request.
    #[error("submit failed: {0}")]
    Submit(#[source] io::Error),

    /// The kernel accepted only part of the batch.
    #[error("submitted {submitted} of {expected} requests")]
    Submission {
        /// Requests in the batch.
        expected: usize,
        /// Requests the kernel accepted.
        submitted: usize,
    },

    /// The batch does not fit in the remaining queue capacity.
    #[error("queue full: {requested} requests, {available} slots available")]
    QueueFull {
        /// Requests in the batch.
        requested: usize,
        /// Free submission slots.
        available: usize,
    },

    /// A correlation id is already in flight (or repeated within the batch).
    #[error("correlation id {0} is already in flight")]
    DuplicateId(u64),

    /// A request completed with a kernel error.
    #[error("request {index} failed: {source}")]
    Completion {
        /// Index of the request within the batch.
        index: usize,
        /// Kernel error.
        #[source]
        source: io::Error,
    },

    /// A request completed with fewer bytes than requested.
    #[error("request {index} read {actual} of {expected} bytes")]
    ShortRead {
        /// Index of the request within the batch.
        index: usize,
        /// Bytes requested.
        expected: usize,
        /// Bytes read.
        actual: usize,
    },

    /// A documented precondition was violated.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// An earlier submission failure left the ring unusable.
    #[error("ring is poisoned by an earlier submission failure")]
    Poisoned,
}

impl IoError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Setup(_) | Self::Poisoned => ErrorKind::Setup,
            Self::Submit(_) | Self::Submission { .. } | Self::QueueFull { .. } => {
                ErrorKind::Submission
            }
            Self::Completion { .. } | Self::ShortRead { .. } => ErrorKind::Completion,
            Self::Precondition(_) | Self::DuplicateId(_) => ErrorKind::Precondition,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Requests
// ------------------------------------------------------------------------------------------------

/// One positioned read: fill `buf` from the file starting at `offset`.
#[derive(Debug)]
pub struct ReadRequest<'b> {
    /// Destination buffer; its length is the byte count.
    pub buf: &'b mut [u8],

    /// Byte offset in the file.
    pub offset: u64,
}

impl<'b> ReadRequest<'b> {
    /// Creates a request reading `buf.len()` bytes at `offset`.
    pub fn new(buf: &'b mut [u8], offset: u64) -> Self {
        Self { buf, offset }
    }

    /// Byte count.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` for a zero-byte request.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Splits `buf` into consecutive requests of the given `(offset, len)`
/// shapes. The lengths must not sum to more than `buf.len()`.
pub(crate) fn split_requests<'b>(
    mut buf: &'b mut [u8],
    shapes: &[(u64, usize)],
) -> Result<Vec<ReadRequest<'b>>, IoError> {
    let mut requests = Vec::with_capacity(shapes.len());
    for &(offset, len) in shapes {
        if len > buf.len() {
            return Err(IoError::Precondition(format!(
                "destination buffer too small for a {len} byte read"
            )));
        }
        let (head, tail) = std::mem::take(&mut buf).split_at_mut(len);
        requests.push(ReadRequest::new(head, offset));
        buf = tail;
    }
    Ok(requests)
}

// ------------------------------------------------------------------------------------------------
// BatchRead trait
// ------------------------------------------------------------------------------------------------

/// A uniform interface for the blocking batch-read backends.
///
/// Implementations either fill every buffer completely and return
/// `Ok(requests.len())`, or fail the batch. A failed batch may have written
/// into any of the buffers. Implementations never return while the kernel
/// may still write into a request buffer.
pub trait BatchRead {
    /// Reads every request from `file`.
    fn read_batch(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError>;

    /// The strategy this backend implements.
    fn backend(&self) -> BackendType;

    /// Returns `false` once the backend can no longer serve batches and
    /// should be replaced.
    fn is_healthy(&self) -> bool {
        true
    }
}

// ------------------------------------------------------------------------------------------------
// BackendType — config-level backend selector
// ------------------------------------------------------------------------------------------------

/// Selects which kernel strategy a [`PageReader`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Blocking positioned reads, one syscall per request.
    Sync,

    /// Legacy Linux AIO (`io_submit` / `io_getevents`).
    Aio,

    /// io_uring, with the file registered as a fixed descriptor.
    Uring,
}

impl BackendType {
    /// Builds one backend instance of this type.
    ///
    /// `register` is the descriptor the backend will mostly read from; the
    /// ring registers it as fixed file 0, the other strategies ignore it.
    pub fn build(
        &self,
        queue_depth: u32,
        register: Option<BorrowedFd<'_>>,
    ) -> Result<Box<dyn BatchRead + Send>, IoError> {
        Ok(match self {
            Self::Sync => Box::new(SyncReader::new()),
            Self::Aio => Box::new(AioReader::new(queue_depth)?),
            Self::Uring => Box::new(Ring::create(queue_depth, register)?),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Shared helpers
// ------------------------------------------------------------------------------------------------

/// Checks the direct I/O preconditions of a batch.
///
/// Compiled to a no-op in release builds. In debug builds every buffer
/// address, size and offset must be a multiple of [`DIRECT_IO_ALIGNMENT`],
/// and no read may start past the block-rounded end of the file.
pub(crate) fn check_direct_requests(
    file: &DataFile,
    requests: &[ReadRequest<'_>],
) -> Result<(), IoError> {
    if !cfg!(debug_assertions) {
        return Ok(());
    }

    let align = DIRECT_IO_ALIGNMENT;
    let file_len = file.len()?;
    let padded_len = file_len.div_ceil(align as u64) * align as u64;

    for (index, req) in requests.iter().enumerate() {
        let addr = req.buf.as_ptr() as usize;
        if addr % align != 0 {
            return Err(IoError::Precondition(format!(
                "request {index}: buffer address {addr:#x} is not {align}-byte aligned"
            )));
        }
        if req.len() % align != 0 {
            return Err(IoError::Precondition(format!(
                "request {index}: size {} is not a multiple of {align}",
                req.len()
            )));
        }
        if req.offset % align as u64 != 0 {
            return Err(IoError::Precondition(format!(
                "request {index}: offset {} is not a multiple of {align}",
                req.offset
            )));
        }
        let Some(end) = req.offset.checked_add(req.len() as u64) else {
            return Err(IoError::Precondition(format!(
                "request {index}: {} bytes at offset {} overflow the file offset range",
                req.len(),
                req.offset
            )));
        };
        if end > padded_len {
            return Err(IoError::Precondition(format!(
                "request {index}: {} bytes at offset {} run past end of file ({file_len} bytes)",
                req.len(),
                req.offset
            )));
        }
    }
    Ok(())
}

/// Validates one completion result against the requested byte count.
pub(crate) fn check_completion(index: usize, res: i64, expected: usize) -> Result<usize, IoError> {
    if res < 0 {
        return Err(IoError::Completion {
            index,
            source: io::Error::from_raw_os_error(-res as i32),
        });
    }
    let actual = res as usize;
    if actual != expected {
        return Err(IoError::ShortRead {
            index,
            expected,
            actual,
        });
    }
    Ok(actual)
}
