//! Legacy Linux AIO backend (`io_setup` / `io_submit` / `io_getevents`).
//!
//! The kernel context is created lazily on the first batch and destroyed when
//! the [`AioReader`] is dropped. Each call submits its requests in chunks of
//! at most `depth`, then blocks until every submitted request of the chunk
//! has completed. There is no cancellation: even when the kernel accepts only
//! part of a chunk, or a request fails, every accepted request is reaped
//! before the call returns.
//!
//! AIO is only truly asynchronous on files opened with `O_DIRECT`; on
//! buffered files the kernel completes reads during submission.

use std::io;
use std::ptr;

use crossbeam::utils::Backoff;
use libc::{c_long, c_ulong};
use tracing::{debug, error, info, trace, warn};

use super::{
    BackendType, BatchRead, DataFile, IoError, OpenMode, ReadRequest, check_completion,
    check_direct_requests,
};

// ------------------------------------------------------------------------------------------------
// Kernel ABI (linux/aio_abi.h)
// ------------------------------------------------------------------------------------------------

const IOCB_CMD_PREAD: u16 = 0;

/// `struct iocb`.
#[repr(C)]
#[derive(Debug, Default)]
struct IoCb {
    aio_data: u64,
    #[cfg(target_endian = "little")]
    aio_key: u32,
    aio_rw_flags: i32,
    #[cfg(target_endian = "big")]
    aio_key: u32,
    aio_lio_opcode: u16,
    aio_reqprio: i16,
    aio_fildes: u32,
    aio_buf: u64,
    aio_nbytes: u64,
    aio_offset: i64,
    aio_reserved2: u64,
    aio_flags: u32,
    aio_resfd: u32,
}

/// `struct io_event`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct IoEvent {
    data: u64,
    obj: u64,
    res: i64,
    res2: i64,
}

// ------------------------------------------------------------------------------------------------
// AioReader
// ------------------------------------------------------------------------------------------------

/// Batch reader on a private kernel AIO context.
#[derive(Debug)]
pub struct AioReader {
    /// `aio_context_t`; 0 until the first batch.
    ctx: c_ulong,

    /// Maximum requests in flight.
    depth: u32,
}

impl AioReader {
    /// Creates a reader whose context will hold up to `depth` requests.
    ///
    /// # Errors
    ///
    /// [`IoError::Precondition`] if `depth` is zero.
    pub fn new(depth: u32) -> Result<Self, IoError> {
        if depth == 0 {
            return Err(IoError::Precondition("AIO depth must be > 0".into()));
        }
        Ok(Self { ctx: 0, depth })
    }

    /// Maximum requests in flight.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Returns `true` once the kernel context exists.
    pub fn is_initialized(&self) -> bool {
        self.ctx != 0
    }

    fn ensure_context(&mut self) -> Result<(), IoError> {
        if self.ctx != 0 {
            return Ok(());
        }

        let mut ctx: c_ulong = 0;
        // SAFETY: io_setup writes the new context id into `ctx`.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_io_setup,
                self.depth as c_long,
                &mut ctx as *mut c_ulong,
            )
        };
        if ret < 0 {
            let e = io::Error::last_os_error();
            error!(depth = self.depth, error = %e, "io_setup failed");
            return Err(IoError::Setup(e));
        }

        info!(depth = self.depth, "AIO context initialized");
        self.ctx = ctx;
        Ok(())
    }

    /// Submits one chunk and reaps all of it. Returns the first failure.
    fn read_chunk(
        &mut self,
        fd: i32,
        base: usize,
        chunk: &mut [ReadRequest<'_>],
    ) -> Result<(), IoError> {
        let mut iocbs: Vec<IoCb> = chunk
            .iter_mut()
            .enumerate()
            .map(|(i, req)| IoCb {
                aio_data: (base + i) as u64,
                aio_lio_opcode: IOCB_CMD_PREAD,
                aio_fildes: fd as u32,
                aio_buf: req.buf.as_mut_ptr() as u64,
                aio_nbytes: req.buf.len() as u64,
                aio_offset: req.offset as i64,
                ..IoCb::default()
            })
            .collect();
        let mut iocb_ptrs: Vec<*mut IoCb> = iocbs.iter_mut().map(|cb| cb as *mut IoCb).collect();

        let expected = chunk.len();
        let submitted = loop {
            // SAFETY: `iocb_ptrs` holds `expected` valid iocbs whose buffers
            // stay borrowed until they are reaped below.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_io_submit,
                    self.ctx,
                    expected as c_long,
                    iocb_ptrs.as_mut_ptr(),
                )
            };
            if ret >= 0 {
                break ret as usize;
            }
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(expected, error = %e, "io_submit failed");
            return Err(IoError::Submit(e));
        };

        let events = self.reap(submitted);

        if submitted != expected {
            warn!(expected, submitted, "io_submit accepted a partial batch");
            return Err(IoError::Submission {
                expected,
                submitted,
            });
        }

        let mut first_failure = None;
        for ev in events {
            let index = ev.data as usize;
            let expected_len = chunk[index - base].len();
            if let Err(e) = check_completion(index, ev.res, expected_len) {
                error!(index, error = %e, "AIO read failed");
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Blocks until exactly `count` events have been collected.
    fn reap(&mut self, count: usize) -> Vec<IoEvent> {
        let mut events = vec![IoEvent::default(); count];
        let mut collected = 0usize;
        let backoff = Backoff::new();

        while collected < count {
            let want = (count - collected) as c_long;
            // SAFETY: `events[collected..]` has room for `want` entries.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_io_getevents,
                    self.ctx,
                    want,
                    want,
                    events[collected..].as_mut_ptr(),
                    ptr::null_mut::<libc::timespec>(),
                )
            };
            if ret >= 0 {
                collected += ret as usize;
                continue;
            }
            let e = io::Error::last_os_error();
            if e.kind() != io::ErrorKind::Interrupted {
                // Requests are still in flight; their buffers must not be
                // released, so keep waiting.
                warn!(error = %e, remaining = count - collected, "io_getevents failed, retrying");
                backoff.snooze();
            }
        }

        trace!(count, "AIO events reaped");
        events
    }
}

impl BatchRead for AioReader {
    fn read_batch(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError> {
        if file.mode() == OpenMode::Direct {
            check_direct_requests(file, requests)?;
        }
        self.ensure_context()?;

        let fd = std::os::fd::AsRawFd::as_raw_fd(file);
        let depth = self.depth as usize;
        for (chunk_no, chunk) in requests.chunks_mut(depth).enumerate() {
            self.read_chunk(fd, chunk_no * depth, chunk)?;
        }

        debug!(count = requests.len(), "AIO batch complete");
        Ok(requests.len())
    }

    fn backend(&self) -> BackendType {
        BackendType::Aio
    }
}

impl Drop for AioReader {
    fn drop(&mut self) {
        if self.ctx != 0 {
            // SAFETY: the context is ours and every batch was fully reaped.
            let ret = unsafe { libc::syscall(libc::SYS_io_destroy, self.ctx) };
            if ret < 0 {
                warn!(error = %io::Error::last_os_error(), "io_destroy failed");
            }
        }
    }
}
