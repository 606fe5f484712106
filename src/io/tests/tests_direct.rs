//! Direct I/O tests across all backends.
//!
//! Coverage:
//! - Aligned direct reads through sync, AIO and io_uring
//! - Debug-build precondition checks: misaligned buffer, size, offset, and
//!   reads past the padded end of file, offsets near `u64::MAX`
//!
//! Every test skips itself when the filesystem refuses `O_DIRECT` (e.g.
//! some tmpfs mounts) or the kernel facility is unavailable.

#[cfg(test)]
mod tests {
    use crate::io::tests::helpers::*;
    use crate::io::{
        AioReader, AlignedBuf, BatchRead, DIRECT_IO_ALIGNMENT, DataFile, IoError, OpenMode,
        ReadRequest, SyncReader, check_direct_requests,
    };
    use tempfile::TempDir;

    const FILE_LEN: usize = 64 * 1024;

    fn aligned_shapes() -> Vec<(u64, usize)> {
        vec![(0, 4096), (8192, 512), (16_384, 8192), (61_440, 4096)]
    }

    fn read_aligned_with(reader: &mut dyn BatchRead) {
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "direct.bin", FILE_LEN);
        let Some(file) = open_direct_or_skip(&path) else {
            return;
        };

        let shapes = aligned_shapes();
        let total = shapes.iter().map(|s| s.1).sum();
        let mut buf = AlignedBuf::for_direct_io(total).unwrap();
        let mut batch = requests(&mut buf, &shapes);

        match reader.read_batch(&file, &mut batch) {
            Ok(n) => assert_eq!(n, shapes.len()),
            Err(IoError::Setup(_)) => return,
            Err(e) => panic!("{:?}: {e}", reader.backend()),
        }
        for (req, (offset, _)) in batch.iter().zip(shapes) {
            assert_pattern(&req.buf[..], offset);
        }
    }

    #[test]
    fn sync_direct_read() {
        read_aligned_with(&mut SyncReader::new());
    }

    #[test]
    fn aio_direct_read() {
        read_aligned_with(&mut AioReader::new(2).unwrap());
    }

    #[test]
    fn uring_direct_read() {
        let Some(mut ring) = ring_or_skip(2, None) else {
            return;
        };
        read_aligned_with(&mut ring);
    }

    #[test]
    fn misaligned_requests_are_caught_in_debug_builds() {
        if !cfg!(debug_assertions) {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "direct.bin", 4096);
        let Some(file) = open_direct_or_skip(&path) else {
            return;
        };
        let mut reader = SyncReader::new();
        let mut buf = AlignedBuf::for_direct_io(2 * DIRECT_IO_ALIGNMENT).unwrap();

        // Buffer address off by one.
        let mut batch = [ReadRequest::new(&mut buf[1..513], 0)];
        assert!(matches!(
            reader.read_batch(&file, &mut batch),
            Err(IoError::Precondition(_))
        ));

        // Size not a multiple of the alignment.
        let mut batch = [ReadRequest::new(&mut buf[..100], 0)];
        assert!(matches!(
            reader.read_batch(&file, &mut batch),
            Err(IoError::Precondition(_))
        ));

        // Offset not a multiple of the alignment.
        let mut batch = [ReadRequest::new(&mut buf[..512], 100)];
        assert!(matches!(
            reader.read_batch(&file, &mut batch),
            Err(IoError::Precondition(_))
        ));

        // Past the end of the file.
        let mut batch = [ReadRequest::new(&mut buf[..], 4096)];
        assert!(matches!(
            reader.read_batch(&file, &mut batch),
            Err(IoError::Precondition(_))
        ));
    }

    #[test]
    fn unpadded_trailing_block_reads_short() {
        let tmp = TempDir::new().unwrap();
        // 1000 bytes: the second block is partial, so a full-block read of it
        // comes back short.
        let path = write_pattern_file(tmp.path(), "direct.bin", 1000);
        let Some(file) = open_direct_or_skip(&path) else {
            return;
        };
        let mut buf = AlignedBuf::for_direct_io(512).unwrap();
        let mut batch = [ReadRequest::new(&mut buf, 512)];
        let err = SyncReader::new().read_batch(&file, &mut batch).unwrap_err();
        assert!(
            matches!(err, IoError::ShortRead { index: 0, expected: 512, actual: 488 }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn offset_near_u64_max_is_a_precondition_error() {
        if !cfg!(debug_assertions) {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let path = write_pattern_file(tmp.path(), "data.bin", 4096);
        // The check does not need an O_DIRECT descriptor.
        let file = DataFile::open(&path, OpenMode::Buffered).unwrap();
        let mut buf = AlignedBuf::for_direct_io(2 * DIRECT_IO_ALIGNMENT).unwrap();

        let offset = u64::MAX - (DIRECT_IO_ALIGNMENT as u64 - 1);
        let batch = [ReadRequest::new(&mut buf, offset)];
        assert!(matches!(
            check_direct_requests(&file, &batch),
            Err(IoError::Precondition(_))
        ));
    }
}
