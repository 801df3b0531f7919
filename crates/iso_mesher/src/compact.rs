//! Stage 2: compaction of the block list to the blocks straddling the threshold.

use crate::core::{ActiveBlockList, BlockRange};
use crate::primitives::scan_scatter;

/// Keeps block `i` iff `ranges[i].min <= threshold <= ranges[i].max`.
///
/// The result is dense and in ascending block order, so it is identical
/// across runs. An empty list is a valid outcome.
pub fn compact_active_blocks(ranges: &[BlockRange], threshold: f32) -> ActiveBlockList {
    ActiveBlockList {
        indices: scan_scatter(ranges.len(), |i| ranges[i].straddles(threshold)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn active_set_is_exactly_the_straddling_blocks() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let ranges: Vec<BlockRange> = (0..4096)
            .map(|_| {
                let a: f32 = rng.gen_range(-1.0..1.0);
                let b: f32 = rng.gen_range(-1.0..1.0);
                BlockRange { min: a.min(b), max: a.max(b) }
            })
            .collect();
        let threshold = 0.25;
        let active = compact_active_blocks(&ranges, threshold);

        let set: HashSet<u32> = active.indices.iter().copied().collect();
        assert_eq!(set.len(), active.indices.len(), "duplicates");
        assert_eq!(active.count() as usize, active.indices.len());
        for (i, r) in ranges.iter().enumerate() {
            let inside = r.min <= threshold && threshold <= r.max;
            assert_eq!(set.contains(&(i as u32)), inside, "block {i}");
        }
        assert!(active.indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn threshold_on_range_bounds_is_active() {
        let ranges = [
            BlockRange { min: 0.0, max: 1.0 },
            BlockRange { min: 1.0, max: 2.0 },
            BlockRange { min: 1.5, max: 2.0 },
        ];
        let active = compact_active_blocks(&ranges, 1.0);
        assert_eq!(active.indices, vec![0, 1]);
    }

    #[test]
    fn no_blocks_active() {
        let ranges = vec![BlockRange { min: 0.0, max: 0.0 }; 100];
        let active = compact_active_blocks(&ranges, 0.5);
        assert!(active.is_empty());
        assert_eq!(active.count(), 0);
    }
}
