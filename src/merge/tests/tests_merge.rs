//! Deduplicating merge and distinct-count tests.
//!
//! Coverage:
//! - Ties keep `a`'s tuple and drop `b`'s
//! - Duplicates inside either input are removed
//! - `merge(a, a)` yields the distinct elements of `a`
//! - `count_distinct == merge` length on random inputs of every arity
//! - Output overflow is reported, not truncated silently

#[cfg(test)]
mod tests {
    use crate::merge::{
        count_distinct, count_distinct_64, count_distinct_128, merge, merge_64, merge_128,
        merge_192,
    };
    use crate::tuple::{TupleError, TupleView};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// # Scenario
    /// Merge two overlapping single-field inputs.
    ///
    /// # Expected behavior
    /// Union without duplicates, count matches.
    #[test]
    fn overlapping_inputs() {
        let a = [1i64, 3, 5];
        let b = [3i64, 4, 5, 6];
        let mut out = [0i64; 7];

        let n = merge_64(&mut out, &a, &b).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out[..n], &[1, 3, 4, 5, 6]);
        assert_eq!(count_distinct_64(&a, &b).unwrap(), 5);
    }

    #[test]
    fn ties_keep_payload_from_a() {
        let a = [1i64, 100, 3, 300, 5, 500];
        let b = [3i64, -3, 4, -4, 5, -5, 6, -6];
        let mut out = [0i64; 14];

        let n = merge_128(&mut out, &a, &b).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&out[..n * 2], &[1, 100, 3, 300, 4, -4, 5, 500, 6, -6]);
        assert_eq!(count_distinct_128(&a, &b).unwrap(), 5);
    }

    #[test]
    fn duplicates_within_one_input_are_removed() {
        let a = [1i64, 10, 11, 1, 12, 13, 2, 20, 21];
        let b: [i64; 0] = [];
        let mut out = [0i64; 9];

        let n = merge_192(&mut out, &a, &b).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&out[..6], &[1, 10, 11, 2, 20, 21]);
    }

    #[test]
    fn merge_with_itself_yields_distinct_elements() {
        let a = [1i64, 1, 2, 4, 4, 4, 9];
        let mut out = [0i64; 14];

        let n = merge_64(&mut out, &a, &a).unwrap();
        assert_eq!(&out[..n], &[1, 2, 4, 9]);
        assert_eq!(count_distinct_64(&a, &a).unwrap(), 4);
    }

    #[test]
    fn empty_inputs() {
        let empty: [i64; 0] = [];
        let mut out: [i64; 0] = [];
        assert_eq!(merge_64(&mut out, &empty, &empty).unwrap(), 0);
        assert_eq!(count_distinct_64(&empty, &empty).unwrap(), 0);

        let b = [7i64, 8];
        let mut out = [0i64; 2];
        assert_eq!(merge_64(&mut out, &empty, &b).unwrap(), 2);
        assert_eq!(out, [7, 8]);
    }

    #[test]
    fn output_too_small() {
        let a = [1i64, 2, 3];
        let b = [4i64];
        let mut out = [0i64; 3];
        assert_eq!(
            merge_64(&mut out, &a, &b).unwrap_err(),
            TupleError::OutputTooSmall {
                capacity: 3,
                required: 4
            }
        );
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn misaligned_input_is_rejected() {
        let a = [1i64, 2, 3];
        let b = [4i64, 5];
        let mut out = [0i64; 5];
        assert!(matches!(
            merge_128(&mut out, &a, &b),
            Err(TupleError::Misaligned { .. })
        ));
    }

    fn sorted_random<const S: usize>(rng: &mut StdRng) -> Vec<i64> {
        let count = rng.random_range(0..300);
        let mut keys: Vec<i64> = (0..count).map(|_| rng.random_range(0..200)).collect();
        keys.sort_unstable();
        keys.iter()
            .flat_map(|&k| std::iter::once(k).chain(std::iter::repeat_n(k * 7, S - 1)))
            .collect()
    }

    fn check_count_matches_merge<const S: usize>(rng: &mut StdRng) {
        for _ in 0..25 {
            let a = sorted_random::<S>(rng);
            let b = sorted_random::<S>(rng);
            let va = TupleView::<S>::new(&a).unwrap();
            let vb = TupleView::<S>::new(&b).unwrap();

            let mut out = vec![0i64; a.len() + b.len()];
            let n = merge(&mut out, va, vb).unwrap();
            assert_eq!(n, count_distinct(va, vb));

            // Output keys are strictly increasing.
            let merged = TupleView::<S>::new(&out[..n * S]).unwrap();
            assert!(merged.keys().zip(merged.keys().skip(1)).all(|(x, y)| x < y));

            // And exactly the union of the input keys.
            let mut union: Vec<i64> = va.keys().chain(vb.keys()).collect();
            union.sort_unstable();
            union.dedup();
            assert_eq!(merged.keys().collect::<Vec<_>>(), union);
        }
    }

    #[test]
    fn count_distinct_matches_merge_for_every_arity() {
        let mut rng = StdRng::seed_from_u64(0xd15);
        check_count_matches_merge::<1>(&mut rng);
        check_count_matches_merge::<2>(&mut rng);
        check_count_matches_merge::<3>(&mut rng);
    }
}
