//! Data-parallel building blocks for the CPU stages.
//!
//! These mirror what the compute shaders do with workgroups: a strided
//! per-lane fold followed by a halving tree, and a chunked exclusive scan
//! whose offsets drive a scatter into disjoint output slots.

use std::ops::Range;

use rayon::prelude::*;

/// Elements per scan chunk. Each chunk is scanned by one task.
pub const SCAN_CHUNK: usize = 1024;

/// Reduces `map(0..len)` with `combine`.
///
/// `lanes` accumulators each fold a strided subset, then rounds of pairwise
/// combination halve the live accumulators until one remains. `combine`
/// must be associative and commutative with `identity` as its neutral
/// element. `lanes` is rounded up to a power of two.
pub fn tree_reduce<T, M, C>(len: usize, lanes: usize, identity: T, map: M, combine: C) -> T
where
    T: Copy + Send + Sync,
    M: Fn(usize) -> T + Sync,
    C: Fn(T, T) -> T + Sync,
{
    let lanes = lanes.max(1).next_power_of_two();
    let mut partials: Vec<T> = (0..lanes)
        .into_par_iter()
        .map(|lane| {
            let mut acc = identity;
            let mut i = lane;
            while i < len {
                acc = combine(acc, map(i));
                i += lanes;
            }
            acc
        })
        .collect();

    let mut live = lanes;
    while live > 1 {
        let half = live / 2;
        let (lo, hi) = partials[..live].split_at_mut(half);
        lo.par_iter_mut()
            .zip(hi.par_iter())
            .for_each(|(a, b)| *a = combine(*a, *b));
        live = half;
    }
    partials[0]
}

/// Exclusive prefix scan. Returns the per-element offsets and the total.
pub fn exclusive_scan<T, C>(input: &[T], identity: T, combine: C) -> (Vec<T>, T)
where
    T: Copy + Send + Sync,
    C: Fn(T, T) -> T + Sync,
{
    if input.is_empty() {
        return (Vec::new(), identity);
    }

    let mut out = vec![identity; input.len()];
    let chunk_totals: Vec<T> = out
        .par_chunks_mut(SCAN_CHUNK)
        .zip(input.par_chunks(SCAN_CHUNK))
        .map(|(dst, src)| {
            let mut acc = identity;
            for (slot, &v) in dst.iter_mut().zip(src) {
                *slot = acc;
                acc = combine(acc, v);
            }
            acc
        })
        .collect();

    let mut carry = identity;
    let mut chunk_offsets = Vec::with_capacity(chunk_totals.len());
    for total in chunk_totals {
        chunk_offsets.push(carry);
        carry = combine(carry, total);
    }

    out.par_chunks_mut(SCAN_CHUNK)
        .zip(chunk_offsets.par_iter())
        .for_each(|(dst, &base)| {
            for slot in dst {
                *slot = combine(base, *slot);
            }
        });
    (out, carry)
}

/// Stream compaction: the indices in `0..len` for which `predicate` holds,
/// in ascending order.
///
/// Flags are scanned into destination slots, then every chunk scatters its
/// matches into its own contiguous run of the output.
pub fn scan_scatter<P>(len: usize, predicate: P) -> Vec<u32>
where
    P: Fn(usize) -> bool + Sync,
{
    let flags: Vec<u32> = (0..len)
        .into_par_iter()
        .map(|i| u32::from(predicate(i)))
        .collect();
    let (offsets, total) = exclusive_scan(&flags, 0u32, |a, b| a + b);

    let mut out = vec![0u32; total as usize];
    let mut runs: Vec<(Range<usize>, &mut [u32])> = Vec::new();
    let mut rest = out.as_mut_slice();
    for start in (0..len).step_by(SCAN_CHUNK) {
        let end = (start + SCAN_CHUNK).min(len);
        let run_end = if end < len { offsets[end] } else { total };
        let run_len = (run_end - offsets[start]) as usize;
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(run_len);
        runs.push((start..end, head));
        rest = tail;
    }

    runs.into_par_iter().for_each(|(range, dst)| {
        let base = offsets[range.start];
        for i in range {
            if flags[i] != 0 {
                dst[(offsets[i] - base) as usize] = i as u32;
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn tree_reduce_sums() {
        let total = tree_reduce(1000, 64, 0u64, |i| i as u64, |a, b| a + b);
        assert_eq!(total, 999 * 1000 / 2);
    }

    #[test]
    fn tree_reduce_more_lanes_than_items() {
        let max = tree_reduce(3, 64, i32::MIN, |i| [4, 9, -2][i], i32::max);
        assert_eq!(max, 9);
    }

    #[test]
    fn tree_reduce_empty_is_identity() {
        let v = tree_reduce(0, 8, f32::INFINITY, |_| 0.0, f32::min);
        assert_eq!(v, f32::INFINITY);
    }

    #[test]
    fn exclusive_scan_across_chunks() {
        let input: Vec<u32> = (0..(SCAN_CHUNK * 3 + 17) as u32).map(|i| i % 3).collect();
        let (offsets, total) = exclusive_scan(&input, 0u32, |a, b| a + b);
        let mut running = 0u32;
        for (i, &v) in input.iter().enumerate() {
            assert_eq!(offsets[i], running, "offset {i}");
            running += v;
        }
        assert_eq!(total, running);
    }

    #[test]
    fn scan_scatter_matches_filter() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let keep: Vec<bool> = (0..5000).map(|_| rng.gen_bool(0.3)).collect();
        let compacted = scan_scatter(keep.len(), |i| keep[i]);
        let expected: Vec<u32> = (0..keep.len() as u32).filter(|&i| keep[i as usize]).collect();
        assert_eq!(compacted, expected);
    }

    #[test]
    fn scan_scatter_none_and_all() {
        assert!(scan_scatter(2500, |_| false).is_empty());
        let all = scan_scatter(2500, |_| true);
        assert_eq!(all.len(), 2500);
        assert_eq!(all[2499], 2499);
    }
}
