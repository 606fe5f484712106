//! io_uring blocking-mode tests.
//!
//! Coverage:
//! - Ring creation with and without fixed-file registration
//! - Batches larger than the queue depth are chunked and fully reaped
//! - Reads of a file other than the registered one
//! - Short reads fail the batch after every completion is reclaimed
//! - The ring stays usable after a failed batch
//! - A reused descriptor number never reads through the fixed slot
//! - A refused submission poisons the ring
//!
//! Every test skips itself when io_uring is unavailable.

#[cfg(test)]
mod tests {
    use crate::io::tests::helpers::*;
    use crate::io::{BackendType, BatchRead, DataFile, IoError, OpenMode, ReadRequest, Ring};
    use tempfile::TempDir;

    #[test]
    fn zero_depth_is_rejected() {
        assert!(matches!(
            Ring::create(0, None),
            Err(IoError::Precondition(_))
        ));
    }

    #[test]
    fn create_reports_depth() {
        init_tracing();
        let Some(ring) = ring_or_skip(16, None) else {
            return;
        };
        assert!(ring.depth() >= 16);
        assert_eq!(ring.in_flight(), 0);
        assert!(!ring.is_poisoned());
        assert_eq!(ring.backend(), BackendType::Uring);
        ring.destroy();
    }

    /// # Scenario
    /// Four blocking requests on a ring of depth 2, through the registered
    /// file.
    ///
    /// # Expected behavior
    /// Two chunks are submitted and reaped; all four buffers are filled.
    #[test]
    fn four_requests_on_depth_two() {
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "data.bin", 64 * 1024);
        let file = DataFile::open(&path, OpenMode::Buffered).unwrap();
        let Some(mut ring) = ring_or_skip(2, Some(&file)) else {
            return;
        };
        assert_eq!(ring.depth(), 2);

        let shapes = [(0u64, 4096usize), (8192, 4096), (16_384, 100), (60_000, 5_536)];
        let mut buf = vec![0u8; shapes.iter().map(|s| s.1).sum()];
        let mut batch = requests(&mut buf, &shapes);

        assert_eq!(ring.read_buffered(&file, &mut batch).unwrap(), 4);
        for (req, (offset, _)) in batch.iter().zip(shapes) {
            assert_pattern(&req.buf[..], offset);
        }
    }

    #[test]
    fn reads_unregistered_file() {
        let tmp = TempDir::new().unwrap();
        let registered = write_pattern_file(tmp.path(), "a.bin", 1_000);
        let other = write_pattern_file(tmp.path(), "b.bin", 10_000);
        let registered = DataFile::open(&registered, OpenMode::Buffered).unwrap();
        let other = DataFile::open(&other, OpenMode::Buffered).unwrap();

        let Some(mut ring) = ring_or_skip(8, Some(&registered)) else {
            return;
        };

        let mut a = vec![0u8; 3_000];
        let mut b = vec![0u8; 500];
        let mut batch = [ReadRequest::new(&mut a, 7_000), ReadRequest::new(&mut b, 500)];
        assert_eq!(ring.read_buffered(&other, &mut batch).unwrap(), 2);
        assert_pattern(&a, 7_000);
        assert_pattern(&b, 500);

        let mut c = vec![0u8; 1_000];
        let mut batch = [ReadRequest::new(&mut c, 0)];
        assert_eq!(ring.read_batch(&registered, &mut batch).unwrap(), 1);
        assert_pattern(&c, 0);
    }

    #[test]
    fn short_read_fails_after_full_reap() {
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "data.bin", 10_000);
        let file = DataFile::open(&path, OpenMode::Buffered).unwrap();
        let Some(mut ring) = ring_or_skip(4, Some(&file)) else {
            return;
        };

        let mut a = vec![0u8; 1_000];
        let mut b = vec![0u8; 1_000];
        let mut c = vec![0u8; 1_000];
        let mut batch = [
            ReadRequest::new(&mut a, 0),
            ReadRequest::new(&mut b, 9_800),
            ReadRequest::new(&mut c, 5_000),
        ];
        let err = ring.read_buffered(&file, &mut batch).unwrap_err();
        assert!(
            matches!(
                err,
                IoError::ShortRead {
                    index: 1,
                    expected: 1_000,
                    actual: 200
                }
            ),
            "unexpected error: {err:?}"
        );
        // Collection continued past the failure.
        assert_pattern(&a, 0);
        assert_pattern(&c, 5_000);
        assert!(!ring.is_poisoned());

        let mut d = vec![0u8; 4_000];
        let mut batch = [ReadRequest::new(&mut d, 6_000)];
        assert_eq!(ring.read_buffered(&file, &mut batch).unwrap(), 1);
        assert_pattern(&d, 6_000);
    }

    #[test]
    fn kernel_error_names_the_request() {
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "data.bin", 1_000);
        let file = DataFile::open(&path, OpenMode::Buffered).unwrap();
        let Some(mut ring) = ring_or_skip(4, None) else {
            return;
        };

        let mut a = vec![0u8; 10];
        let mut b = vec![0u8; 10];
        let mut batch = [
            ReadRequest::new(&mut a, 0),
            ReadRequest::new(&mut b, u64::MAX - 100),
        ];
        let err = ring.read_buffered(&file, &mut batch).unwrap_err();
        assert!(
            matches!(err, IoError::Completion { index: 1, .. }),
            "unexpected error: {err:?}"
        );
        assert_pattern(&a, 0);
    }

    #[test]
    fn empty_batch() {
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "data.bin", 10);
        let file = DataFile::open(&path, OpenMode::Buffered).unwrap();
        let Some(mut ring) = ring_or_skip(4, None) else {
            return;
        };
        assert_eq!(ring.read_buffered(&file, &mut []).unwrap(), 0);
    }

    /// # Scenario
    /// Register `a.bin`, close it, then open `b.bin`, which the kernel hands
    /// the same descriptor number.
    ///
    /// # Expected behavior
    /// Reads of `b.bin` return its own bytes, not those of the file still
    /// held by the fixed slot. A fresh handle to `a.bin` reads `a.bin`.
    #[test]
    fn reused_descriptor_reads_its_own_file() {
        let tmp = TempDir::new().unwrap();
        let a_path = tmp.path().join("a.bin");
        let b_path = tmp.path().join("b.bin");
        std::fs::write(&a_path, vec![0xAA; 4096]).unwrap();
        std::fs::write(&b_path, vec![0xBB; 4096]).unwrap();

        let a = DataFile::open(&a_path, OpenMode::Buffered).unwrap();
        let Some(mut ring) = ring_or_skip(4, Some(&a)) else {
            return;
        };
        drop(a);

        // Typically gets the descriptor number `a` just released.
        let b = DataFile::open(&b_path, OpenMode::Buffered).unwrap();

        let mut buf = vec![0u8; 4096];
        let mut batch = [ReadRequest::new(&mut buf, 0)];
        assert_eq!(ring.read_buffered(&b, &mut batch).unwrap(), 1);
        assert!(buf.iter().all(|&byte| byte == 0xBB), "read the registered file");

        drop(b);
        let a = DataFile::open(&a_path, OpenMode::Buffered).unwrap();
        let mut buf = vec![0u8; 4096];
        let mut batch = [ReadRequest::new(&mut buf, 0)];
        assert_eq!(ring.read_batch(&a, &mut batch).unwrap(), 1);
        assert!(buf.iter().all(|&byte| byte == 0xAA));
    }

    /// # Scenario
    /// The kernel accepts none of a blocking chunk.
    ///
    /// # Expected behavior
    /// `Submission { submitted: 0 }`, the ring is poisoned and reports
    /// itself unhealthy, and later batches fail with `Poisoned`.
    #[test]
    fn refused_submission_poisons_the_ring() {
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "data.bin", 8_192);
        let file = DataFile::open(&path, OpenMode::Buffered).unwrap();
        let Some(mut ring) = ring_or_skip(4, Some(&file)) else {
            return;
        };
        assert!(ring.is_healthy());

        ring.refuse_next_submit();
        let mut a = vec![0u8; 100];
        let mut b = vec![0u8; 100];
        let mut batch = [ReadRequest::new(&mut a, 0), ReadRequest::new(&mut b, 100)];
        let err = ring.read_buffered(&file, &mut batch).unwrap_err();
        assert!(
            matches!(
                err,
                IoError::Submission {
                    expected: 2,
                    submitted: 0
                }
            ),
            "unexpected error: {err:?}"
        );
        assert!(ring.is_poisoned());
        assert!(!ring.is_healthy());

        let mut c = vec![0u8; 100];
        let mut batch = [ReadRequest::new(&mut c, 0)];
        assert!(matches!(
            ring.read_batch(&file, &mut batch),
            Err(IoError::Poisoned)
        ));
        ring.destroy();
    }
}
