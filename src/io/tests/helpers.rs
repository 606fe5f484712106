use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::io::{
    AlignedBuf, BatchRead, DIRECT_IO_ALIGNMENT, DataFile, IoError, OpenMode, ReadRequest, Ring,
    SyncReader,
};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Byte stored at file offset `i` by [`write_pattern_file`].
pub fn pattern_byte(i: u64) -> u8 {
    (i % 251) as u8
}

/// Expected contents of `len` bytes at `offset`.
pub fn pattern(offset: u64, len: usize) -> Vec<u8> {
    (offset..offset + len as u64).map(pattern_byte).collect()
}

/// Writes `len` pattern bytes to `dir/name`.
pub fn write_pattern_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    init_tracing();
    let path = dir.join(name);
    fs::write(&path, pattern(0, len)).unwrap();
    path
}

/// Creates a ring, or returns `None` when the kernel (or a sandbox) refuses
/// io_uring.
pub fn ring_or_skip<'a>(depth: u32, register: Option<&DataFile>) -> Option<Ring<'a>> {
    use std::os::fd::AsFd;
    match Ring::create(depth, register.map(|f| f.as_fd())) {
        Ok(ring) => Some(ring),
        Err(IoError::Setup(e)) => {
            warn!(error = %e, "io_uring unavailable, skipping");
            None
        }
        Err(e) => panic!("unexpected ring setup error: {e}"),
    }
}

/// Opens `path` with `O_DIRECT` and probes one aligned read, or returns
/// `None` when the filesystem does not support direct I/O.
pub fn open_direct_or_skip(path: &Path) -> Option<DataFile> {
    let file = match DataFile::open(path, OpenMode::Direct) {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "O_DIRECT open refused, skipping");
            return None;
        }
    };
    let mut probe = AlignedBuf::for_direct_io(DIRECT_IO_ALIGNMENT).unwrap();
    let mut batch = [ReadRequest::new(&mut probe, 0)];
    match SyncReader::new().read_batch(&file, &mut batch) {
        Ok(_) => Some(file),
        Err(e) => {
            warn!(error = %e, "O_DIRECT read refused, skipping");
            None
        }
    }
}

/// Carves `shapes.len()` buffers of the given sizes out of `buf` and pairs
/// them with their offsets.
pub fn requests<'b>(buf: &'b mut [u8], shapes: &[(u64, usize)]) -> Vec<ReadRequest<'b>> {
    crate::io::split_requests(buf, shapes).unwrap()
}

/// Asserts that `buf` holds the pattern bytes of `[offset, offset + len)`.
pub fn assert_pattern(buf: &[u8], offset: u64) {
    assert_eq!(buf, pattern(offset, buf.len()).as_slice(), "bytes at offset {offset}");
}
