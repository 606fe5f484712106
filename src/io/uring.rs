//! # io_uring Ring Scheduler
//!
//! A [`Ring`] owns one io_uring instance and offers two ways of driving it.
//!
//! ## Blocking mode
//!
//! [`Ring::read_buffered`] and [`Ring::read_direct`] read a slice of
//! [`ReadRequest`]s and return once every request has completed. Batches
//! larger than the queue depth are split into depth-sized chunks; each chunk
//! is submitted in one syscall and fully reaped before the next one starts.
//! A failed request does not stop collection: the first failure is returned
//! after every completion of the chunk has been reclaimed.
//!
//! ## Decoupled mode
//!
//! [`Ring::submit_and_poll`] submits [`TargetedRead`]s tagged with
//! caller-chosen correlation ids and returns after a few completions are
//! ready, handing them back as [`Completion`]s. [`Ring::poll`] collects more
//! without blocking. Buffers are borrowed for the ring lifetime `'a` and
//! returned inside the completion that carries their id.
//!
//! The two modes must not be mixed: blocking reads are refused while
//! decoupled requests are in flight.
//!
//! ## Teardown
//!
//! [`Ring::destroy`] and `Drop` both wait for every in-flight request
//! before the ring is released, so the kernel never writes into a buffer
//! whose borrow has ended.
//!
//! ## Poisoning
//!
//! When the kernel accepts only part of a submission, the unsubmitted
//! entries stay in the submission queue referencing buffers the caller gets
//! back. The ring is then poisoned: it never enters the kernel with pending
//! submissions again, so those entries are never executed. A poisoned ring
//! can still be polled and dropped; everything else fails with
//! [`IoError::Poisoned`].
//!
//! ## Fixed files
//!
//! A descriptor passed to [`Ring::create`] is registered at fixed index 0.
//! The registration keeps the open file alive in the kernel even after the
//! caller closes its descriptor, and descriptor numbers are reused, so a
//! read goes through the fixed slot only when its file names the same inode
//! with the same `O_DIRECT` setting as the registered one.

use std::collections::{HashMap, HashSet};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use crossbeam::utils::Backoff;
use io_uring::{IoUring, opcode, squeue, types};
use tracing::{debug, error, info, trace, warn};

use super::{
    BackendType, BatchRead, DataFile, IoError, OpenMode, ReadRequest, check_completion,
    check_direct_requests,
};

/// Completions [`Ring::submit_and_poll`] waits for before draining, unless
/// fewer requests are outstanding.
pub const MIN_COMPLETIONS_PER_SUBMIT: usize = 4;

// ------------------------------------------------------------------------------------------------
// Decoupled-mode request / completion
// ------------------------------------------------------------------------------------------------

/// A read tagged with a caller-chosen correlation id, against any open fd.
#[derive(Debug)]
pub struct TargetedRead<'a> {
    /// Correlation id, unique among the requests in flight.
    pub id: u64,

    /// File to read from.
    pub fd: BorrowedFd<'a>,

    /// Destination; its length is the byte count.
    pub buf: &'a mut [u8],

    /// Byte offset in the file.
    pub offset: u64,
}

impl<'a> TargetedRead<'a> {
    /// Creates a read of `buf.len()` bytes at `offset` from `fd`.
    pub fn new(id: u64, fd: BorrowedFd<'a>, buf: &'a mut [u8], offset: u64) -> Self {
        Self {
            id,
            fd,
            buf,
            offset,
        }
    }
}

/// Outcome of one decoupled read.
///
/// `result` holds the number of bytes read, which may be less than
/// `buf.len()` at end of file, or the kernel error.
#[derive(Debug)]
pub struct Completion<'a> {
    /// Correlation id of the request.
    pub id: u64,

    /// The buffer handed over at submission.
    pub buf: &'a mut [u8],

    /// Bytes read, or the failure.
    pub result: io::Result<usize>,
}

impl Completion<'_> {
    /// Returns `true` if the read succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

// ------------------------------------------------------------------------------------------------
// Ring
// ------------------------------------------------------------------------------------------------

/// An owned io_uring instance. See the [module docs](self).
pub struct Ring<'a> {
    ring: IoUring,

    /// Submission queue size as granted by the kernel.
    depth: u32,

    /// Identity of the file registered at fixed index 0, if any.
    registered: Option<FileIdentity>,

    /// Decoupled-mode buffers, keyed by correlation id.
    in_flight: HashMap<u64, &'a mut [u8]>,

    poisoned: bool,

    /// Makes the next submission report zero accepted entries.
    #[cfg(test)]
    refuse_next_submit: bool,
}

impl std::fmt::Debug for Ring<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("depth", &self.depth)
            .field("registered", &self.registered)
            .field("in_flight", &self.in_flight.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl<'a> Ring<'a> {
    /// Creates a ring with room for `queue_depth` submissions and, when
    /// `register` is given, registers that descriptor as fixed file 0.
    ///
    /// # Errors
    ///
    /// [`IoError::Setup`] if the kernel refuses the ring or the registration.
    /// `ENOMEM` usually means the locked-memory limit (`ulimit -l`) is too
    /// low.
    pub fn create(queue_depth: u32, register: Option<BorrowedFd<'_>>) -> Result<Self, IoError> {
        if queue_depth == 0 {
            return Err(IoError::Precondition("queue depth must be > 0".into()));
        }

        let ring = IoUring::new(queue_depth).map_err(|e| {
            if e.raw_os_error() == Some(libc::ENOMEM) {
                error!(
                    queue_depth,
                    error = %e,
                    "io_uring setup failed; the locked memory limit may be too low (see `ulimit -l`)"
                );
            } else {
                error!(queue_depth, error = %e, "io_uring setup failed");
            }
            IoError::Setup(e)
        })?;

        let registered = match register {
            Some(fd) => {
                let raw = fd.as_raw_fd();
                let identity = FileIdentity::of(fd).map_err(IoError::Setup)?;
                ring.submitter().register_files(&[raw]).map_err(|e| {
                    error!(fd = raw, error = %e, "io_uring file registration failed");
                    IoError::Setup(e)
                })?;
                Some(identity)
            }
            None => None,
        };

        let depth = ring.params().sq_entries();
        info!(
            sq_entries = depth,
            cq_entries = ring.params().cq_entries(),
            registered = registered.is_some(),
            "io_uring created"
        );

        Ok(Self {
            ring,
            depth,
            registered,
            in_flight: HashMap::new(),
            poisoned: false,
            #[cfg(test)]
            refuse_next_submit: false,
        })
    }

    /// Submission queue size as granted by the kernel (may exceed the
    /// requested depth).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Decoupled requests submitted but not yet returned as completions.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns `true` after a partial submission.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Releases the ring after waiting for every in-flight request.
    pub fn destroy(self) {
        drop(self);
    }

    // --------------------------------------------------------------------------------------------
    // Blocking mode
    // --------------------------------------------------------------------------------------------

    /// Reads every request from a buffered file.
    ///
    /// # Errors
    ///
    /// The first [`IoError::Completion`] or [`IoError::ShortRead`] of the
    /// failing chunk, [`IoError::Submission`] / [`IoError::Submit`] if the
    /// kernel did not take a chunk, [`IoError::Precondition`] if decoupled
    /// requests are in flight.
    pub fn read_buffered(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError> {
        self.read_blocking(file, requests)
    }

    /// Reads every request from a file opened with `O_DIRECT`.
    ///
    /// Buffers, offsets and sizes must be multiples of
    /// [`DIRECT_IO_ALIGNMENT`](super::DIRECT_IO_ALIGNMENT); debug builds
    /// verify this up front.
    pub fn read_direct(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError> {
        check_direct_requests(file, requests)?;
        self.read_blocking(file, requests)
    }

    fn read_blocking(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError> {
        if self.poisoned {
            return Err(IoError::Poisoned);
        }
        if !self.in_flight.is_empty() {
            return Err(IoError::Precondition(format!(
                "{} decoupled requests in flight; blocking reads cannot share the ring",
                self.in_flight.len()
            )));
        }
        check_lengths(requests.iter().map(|r| r.len()))?;
        if requests.is_empty() {
            return Ok(0);
        }

        let stale = self.ring.completion().count();
        if stale > 0 {
            warn!(stale, "discarded stale io_uring completions");
        }

        let target = self.target(file.as_fd());
        let depth = self.depth as usize;
        for (chunk_no, chunk) in requests.chunks_mut(depth).enumerate() {
            self.read_chunk(target, chunk_no * depth, chunk)?;
        }

        debug!(count = requests.len(), "io_uring batch complete");
        Ok(requests.len())
    }

    fn read_chunk(
        &mut self,
        target: Target,
        base: usize,
        chunk: &mut [ReadRequest<'_>],
    ) -> Result<(), IoError> {
        let expected = chunk.len();

        let mut pushed = 0usize;
        for (i, req) in chunk.iter_mut().enumerate() {
            let entry = read_entry(target, req.buf, req.offset, (base + i) as u64);
            // SAFETY: the buffer is borrowed by `chunk` until every submitted
            // entry has been reaped below, and `fd` is kept open by the caller.
            if unsafe { self.ring.submission().push(&entry) }.is_err() {
                break;
            }
            pushed += 1;
        }

        let submitted = match self.submit() {
            Ok(n) => n,
            Err(e) => {
                self.poisoned = true;
                error!(pushed, error = %e, "io_uring submit failed");
                return Err(IoError::Submit(e));
            }
        };
        if submitted < pushed {
            self.poisoned = true;
        }

        let events = self.wait_for(submitted);

        if submitted != expected {
            warn!(expected, submitted, "io_uring accepted a partial batch");
            return Err(IoError::Submission {
                expected,
                submitted,
            });
        }

        let mut first_failure = None;
        for (user_data, res) in events {
            let index = user_data as usize;
            let Some(req) = index.checked_sub(base).and_then(|i| chunk.get(i)) else {
                warn!(user_data, "completion outside the current batch");
                continue;
            };
            if let Err(e) = check_completion(index, i64::from(res), req.len()) {
                error!(index, offset = req.offset, error = %e, "io_uring read failed");
                first_failure.get_or_insert(e);
            }
        }

        trace!(base, count = expected, "io_uring chunk reaped");
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Decoupled mode
    // --------------------------------------------------------------------------------------------

    /// Submits `requests`, waits until at least
    /// `min(MIN_COMPLETIONS_PER_SUBMIT, in_flight)` completions are ready,
    /// then appends every ready completion to `out`. Returns how many were
    /// appended.
    ///
    /// # Errors
    ///
    /// Nothing is submitted when the batch would exceed the queue depth
    /// ([`IoError::QueueFull`]), reuses an id ([`IoError::DuplicateId`]), or
    /// the ring is poisoned. If the kernel takes only part of the batch the
    /// ring is poisoned, the untaken requests are appended to `out` as
    /// failed completions and [`IoError::Submission`] is returned; the taken
    /// ones stay in flight and can be collected with [`Ring::poll`].
    pub fn submit_and_poll(
        &mut self,
        requests: Vec<TargetedRead<'a>>,
        out: &mut Vec<Completion<'a>>,
    ) -> Result<usize, IoError> {
        if self.poisoned {
            return Err(IoError::Poisoned);
        }

        let available = (self.depth as usize).saturating_sub(self.in_flight.len());
        if requests.len() > available {
            return Err(IoError::QueueFull {
                requested: requests.len(),
                available,
            });
        }
        let mut ids = HashSet::with_capacity(requests.len());
        for req in &requests {
            if self.in_flight.contains_key(&req.id) || !ids.insert(req.id) {
                return Err(IoError::DuplicateId(req.id));
            }
        }
        check_lengths(requests.iter().map(|r| r.buf.len()))?;

        let expected = requests.len();
        let mut pushed_ids = Vec::with_capacity(expected);
        let mut targets: HashMap<RawFd, Target> = HashMap::new();
        let mut requests = requests.into_iter();
        for req in requests.by_ref() {
            let target = *targets
                .entry(req.fd.as_raw_fd())
                .or_insert_with(|| self.target(req.fd));
            let entry = read_entry(target, req.buf, req.offset, req.id);
            // SAFETY: the buffer and fd are borrowed for `'a`, which outlives
            // the ring; `Drop` waits for every in-flight request.
            if unsafe { self.ring.submission().push(&entry) }.is_err() {
                out.push(unsubmitted(req.id, req.buf));
                break;
            }
            self.in_flight.insert(req.id, req.buf);
            pushed_ids.push(req.id);
        }
        // Anything left after a full submission queue.
        for req in requests {
            out.push(unsubmitted(req.id, req.buf));
        }

        let submitted = match self.submit() {
            Ok(n) => n,
            Err(e) => {
                error!(pushed = pushed_ids.len(), error = %e, "io_uring submit failed");
                0
            }
        };
        if submitted < pushed_ids.len() {
            self.poisoned = true;
            for id in &pushed_ids[submitted..] {
                if let Some(buf) = self.in_flight.remove(id) {
                    out.push(unsubmitted(*id, buf));
                }
            }
        }
        if submitted < expected {
            warn!(expected, submitted, "io_uring accepted a partial batch");
            return Err(IoError::Submission {
                expected,
                submitted,
            });
        }

        let want = MIN_COMPLETIONS_PER_SUBMIT.min(self.in_flight.len());
        self.wait_ready(want);
        Ok(self.drain_ready(out))
    }

    /// Appends every ready completion to `out` without blocking. Returns how
    /// many were appended.
    pub fn poll(&mut self, out: &mut Vec<Completion<'a>>) -> usize {
        self.drain_ready(out)
    }

    fn drain_ready(&mut self, out: &mut Vec<Completion<'a>>) -> usize {
        let ready: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();

        let before = out.len();
        for (id, res) in ready {
            let Some(buf) = self.in_flight.remove(&id) else {
                warn!(id, "completion for an unknown correlation id");
                continue;
            };
            let result = if res < 0 {
                let e = io::Error::from_raw_os_error(-res);
                error!(id, error = %e, "io_uring read failed");
                Err(e)
            } else {
                Ok(res as usize)
            };
            out.push(Completion { id, buf, result });
        }

        let drained = out.len() - before;
        trace!(drained, in_flight = self.in_flight.len(), "io_uring completions drained");
        drained
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Picks the fixed slot when `fd` is the registered file.
    fn target(&self, fd: BorrowedFd<'_>) -> Target {
        let fixed = match self.registered {
            Some(registered) => FileIdentity::of(fd).is_ok_and(|id| id == registered),
            None => false,
        };
        if fixed {
            Target::Fixed
        } else {
            Target::Fd(fd.as_raw_fd())
        }
    }

    /// Makes the next submission accept nothing, as a kernel short of
    /// resources would.
    #[cfg(test)]
    pub(crate) fn refuse_next_submit(&mut self) {
        self.refuse_next_submit = true;
    }

    /// Submits pending entries, retrying on `EINTR`.
    fn submit(&mut self) -> io::Result<usize> {
        #[cfg(test)]
        if std::mem::take(&mut self.refuse_next_submit) {
            return Ok(0);
        }
        loop {
            match self.ring.submit() {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    /// Blocks until at least `want` completions are ready. Never submits on
    /// a poisoned ring.
    fn wait_ready(&mut self, want: usize) {
        let backoff = Backoff::new();
        while self.ring.completion().len() < want {
            if self.poisoned {
                backoff.snooze();
                continue;
            }
            match self.ring.submit_and_wait(want) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // Requests are still in flight; keep waiting for them.
                    warn!(want, error = %e, "io_uring wait failed, retrying");
                    backoff.snooze();
                }
            }
        }
    }

    /// Reaps exactly `count` completions as `(user_data, result)` pairs.
    fn wait_for(&mut self, count: usize) -> Vec<(u64, i32)> {
        let mut events = Vec::with_capacity(count);
        while events.len() < count {
            self.wait_ready(1);
            events.extend(
                self.ring
                    .completion()
                    .take(count - events.len())
                    .map(|cqe| (cqe.user_data(), cqe.result())),
            );
        }
        events
    }

    /// Waits for every decoupled request and discards the results.
    fn drain_in_flight(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        warn!(in_flight = self.in_flight.len(), "waiting for in-flight requests before teardown");
        let mut discarded = Vec::new();
        while !self.in_flight.is_empty() {
            self.wait_ready(1);
            self.drain_ready(&mut discarded);
            discarded.clear();
        }
    }
}

impl Drop for Ring<'_> {
    fn drop(&mut self) {
        self.drain_in_flight();
        info!(poisoned = self.poisoned, "io_uring closed");
    }
}

impl BatchRead for Ring<'_> {
    fn read_batch(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError> {
        match file.mode() {
            OpenMode::Buffered => self.read_buffered(file, requests),
            OpenMode::Direct => self.read_direct(file, requests),
        }
    }

    fn backend(&self) -> BackendType {
        BackendType::Uring
    }

    fn is_healthy(&self) -> bool {
        !self.poisoned
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Where a read entry points: the registered slot or a plain descriptor.
#[derive(Debug, Clone, Copy)]
enum Target {
    Fixed,
    Fd(RawFd),
}

/// The inode an open descriptor names and whether it bypasses the page
/// cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
    direct: bool,
}

impl FileIdentity {
    fn of(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let raw = fd.as_raw_fd();
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: `raw` is open for the borrow and `stat` is a valid out pointer.
        if unsafe { libc::fstat(raw, stat.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fstat succeeded, so it filled `stat`.
        let stat = unsafe { stat.assume_init() };
        // SAFETY: F_GETFL only reads descriptor flags.
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            dev: stat.st_dev as u64,
            ino: stat.st_ino as u64,
            direct: flags & libc::O_DIRECT != 0,
        })
    }
}

fn read_entry(target: Target, buf: &mut [u8], offset: u64, user_data: u64) -> squeue::Entry {
    let ptr = buf.as_mut_ptr();
    // Lengths are checked against u32 before any entry is built.
    let len = buf.len() as u32;
    let entry = match target {
        Target::Fixed => opcode::Read::new(types::Fixed(0), ptr, len).offset(offset).build(),
        Target::Fd(fd) => opcode::Read::new(types::Fd(fd), ptr, len).offset(offset).build(),
    };
    entry.user_data(user_data)
}

fn check_lengths(lens: impl Iterator<Item = usize>) -> Result<(), IoError> {
    for (index, len) in lens.enumerate() {
        if u32::try_from(len).is_err() {
            return Err(IoError::Precondition(format!(
                "request {index}: {len} bytes exceeds the per-read limit of {} bytes",
                u32::MAX
            )));
        }
    }
    Ok(())
}

fn unsubmitted(id: u64, buf: &mut [u8]) -> Completion<'_> {
    Completion {
        id,
        buf,
        result: Err(io::Error::from_raw_os_error(libc::EAGAIN)),
    }
}
