//! Aligned buffer tests.
//!
//! Coverage:
//! - Start address honours the requested alignment
//! - Contents start zeroed and are writable
//! - Small alignments are raised to that of `i64`
//! - Non-power-of-two alignments are rejected

#[cfg(test)]
mod tests {
    use crate::io::{AlignedBuf, DIRECT_IO_ALIGNMENT, ErrorKind, IoError};

    #[test]
    fn address_is_aligned() {
        for align in [8usize, 512, 4096, 65536] {
            let buf = AlignedBuf::zeroed(1000, align).unwrap();
            assert_eq!(buf.as_ptr() as usize % align, 0, "align {align}");
            assert_eq!(buf.align(), align);
            assert_eq!(buf.len(), 1000);
        }

        let buf = AlignedBuf::for_direct_io(4096).unwrap();
        assert_eq!(buf.as_ptr() as usize % DIRECT_IO_ALIGNMENT, 0);
    }

    #[test]
    fn starts_zeroed_and_is_writable() {
        let mut buf = AlignedBuf::zeroed(4096, 512).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        buf[0] = 0xab;
        buf[4095] = 0xcd;
        assert_eq!(buf[0], 0xab);
        assert_eq!(buf[4095], 0xcd);
    }

    #[test]
    fn small_alignment_is_raised() {
        let mut buf = AlignedBuf::zeroed(20, 1).unwrap();
        assert_eq!(buf.align(), 8);
        assert_eq!(buf.as_longs().len(), 2);

        buf.as_longs_mut()[1] = -7;
        assert_eq!(&buf[8..16], &(-7i64).to_ne_bytes());
    }

    #[test]
    fn zero_length_buffer() {
        let buf = AlignedBuf::zeroed(0, 4096).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn non_power_of_two_alignment_is_rejected() {
        let err = AlignedBuf::zeroed(64, 24).unwrap_err();
        assert!(matches!(err, IoError::Precondition(_)));
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }
}
