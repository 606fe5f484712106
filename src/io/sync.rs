//! Synchronous backend: one blocking positioned read per request.

use std::io::ErrorKind as StdErrorKind;
use std::os::unix::fs::FileExt;

use tracing::{error, trace};

use super::{BackendType, BatchRead, DataFile, IoError, OpenMode, ReadRequest, check_direct_requests};

/// Reads each request with `pread`, in order, on the calling thread.
///
/// The first error or short count fails the batch; later requests are not
/// attempted. The failing request index is carried by the error.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReader;

impl SyncReader {
    /// Creates the (stateless) synchronous backend.
    pub fn new() -> Self {
        Self
    }
}

impl BatchRead for SyncReader {
    fn read_batch(
        &mut self,
        file: &DataFile,
        requests: &mut [ReadRequest<'_>],
    ) -> Result<usize, IoError> {
        if file.mode() == OpenMode::Direct {
            check_direct_requests(file, requests)?;
        }

        for (index, req) in requests.iter_mut().enumerate() {
            let expected = req.len();
            let actual = loop {
                match file.file().read_at(req.buf, req.offset) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == StdErrorKind::Interrupted => continue,
                    Err(source) => {
                        error!(index, offset = req.offset, %source, "pread failed");
                        return Err(IoError::Completion { index, source });
                    }
                }
            };
            if actual != expected {
                error!(index, offset = req.offset, expected, actual, "short pread");
                return Err(IoError::ShortRead {
                    index,
                    expected,
                    actual,
                });
            }
        }

        trace!(count = requests.len(), "sync batch complete");
        Ok(requests.len())
    }

    fn backend(&self) -> BackendType {
        BackendType::Sync
    }
}
