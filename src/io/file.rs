//! Read-only data files, open modes and page-cache hints.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use memmap2::{Advice, Mmap};
use tracing::{debug, info};

use super::IoError;

/// How a [`DataFile`] reaches the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Through the page cache.
    Buffered,

    /// `O_DIRECT`: bypasses the page cache; requires 512-byte aligned
    /// buffers, offsets and sizes.
    Direct,
}

/// A file opened read-only for batched page reads.
#[derive(Debug)]
pub struct DataFile {
    file: File,
    mode: OpenMode,
    path: PathBuf,
}

impl DataFile {
    /// Opens `path` read-only in the given mode.
    ///
    /// # Errors
    ///
    /// [`IoError::Io`] if the file cannot be opened, e.g. `EINVAL` when the
    /// filesystem does not support `O_DIRECT`.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, IoError> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true);
        if mode == OpenMode::Direct {
            options.custom_flags(libc::O_DIRECT);
        }
        let file = options.open(path)?;

        info!(path = %path.display(), ?mode, "data file opened");

        Ok(Self {
            file,
            mode,
            path: path.to_path_buf(),
        })
    }

    /// The open mode.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying file handle.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64, IoError> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns `true` if the file is currently empty.
    pub fn is_empty(&self) -> Result<bool, IoError> {
        Ok(self.len()? == 0)
    }

    /// Advises the kernel that the whole file will be read randomly, which
    /// disables read-ahead.
    pub fn fadvise_random(&self) -> Result<(), IoError> {
        self.fadvise(libc::POSIX_FADV_RANDOM)
    }

    /// Advises the kernel that the whole file will be needed soon.
    pub fn fadvise_willneed(&self) -> Result<(), IoError> {
        self.fadvise(libc::POSIX_FADV_WILLNEED)
    }

    fn fadvise(&self, advice: libc::c_int) -> Result<(), IoError> {
        // SAFETY: plain syscall on a descriptor we own.
        let ret = unsafe { libc::posix_fadvise(self.file.as_raw_fd(), 0, 0, advice) };
        if ret != 0 {
            // posix_fadvise returns the error number instead of setting errno.
            return Err(IoError::Io(std::io::Error::from_raw_os_error(ret)));
        }
        debug!(path = %self.path.display(), advice, "fadvise applied");
        Ok(())
    }

    /// Maps the whole file read-only.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`; sound as long as the file is not
    /// truncated or rewritten while the mapping is alive, which holds for the
    /// immutable pages this layer reads.
    pub fn map(&self) -> Result<Mmap, IoError> {
        let mmap = unsafe { Mmap::map(&self.file)? };
        Ok(mmap)
    }
}

impl AsFd for DataFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for DataFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Marks a mapped region as randomly accessed (`MADV_RANDOM`).
pub fn advise_random(map: &Mmap) -> Result<(), IoError> {
    map.advise(Advice::Random)?;
    Ok(())
}
