//! Stage 1: per-block min/max reduction.

use rayon::prelude::*;

use crate::core::{BlockLayout, BlockRange};
use crate::primitives::tree_reduce;
use crate::sampler::VolumeSampler;

/// Computes the value range of every block's footprint, indexed by block.
///
/// Blocks are independent; inside a block `lanes` partial ranges are folded
/// and then combined pairwise. Every footprint sample is read exactly once.
/// NaN samples are dropped by `f32::min`/`f32::max`.
pub fn reduce_block_ranges(
    sampler: &VolumeSampler<'_>,
    layout: &BlockLayout,
    lanes: usize,
) -> Vec<BlockRange> {
    let dims = sampler.dims();
    (0..layout.num_blocks_total())
        .into_par_iter()
        .map(|block| {
            let (lo, hi) = layout.footprint(block, dims);
            let ext = [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]];
            let len = (ext[0] * ext[1] * ext[2]) as usize;
            tree_reduce(
                len,
                lanes,
                BlockRange::EMPTY,
                |i| {
                    let i = i as u32;
                    let x = lo[0] + i % ext[0];
                    let y = lo[1] + (i / ext[0]) % ext[1];
                    let z = lo[2] + i / (ext[0] * ext[1]);
                    BlockRange::of(sampler.sample_in_range(x, y, z))
                },
                BlockRange::union,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScalarVolume, VolumeSpec};
    use crate::sampler::BoundaryMode;
    use rand::{Rng, SeedableRng};

    fn brute_force(vol: &ScalarVolume, layout: &BlockLayout) -> Vec<BlockRange> {
        (0..layout.num_blocks_total())
            .map(|b| {
                let (lo, hi) = layout.footprint(b, vol.dims());
                let mut r = BlockRange::EMPTY;
                for z in lo[2]..hi[2] {
                    for y in lo[1]..hi[1] {
                        for x in lo[0]..hi[0] {
                            r = r.union(BlockRange::of(vol.get(x, y, z)));
                        }
                    }
                }
                r
            })
            .collect()
    }

    #[test]
    fn matches_brute_force_on_random_volume() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let spec = VolumeSpec::new([19, 12, 9]);
        let samples: Vec<f32> = (0..spec.num_voxels()).map(|_| rng.gen_range(-5.0..5.0)).collect();
        let vol = ScalarVolume::new(spec, samples).expect("volume");
        let layout = BlockLayout::new([8, 8, 8], vol.dims()).expect("layout");
        let sampler = VolumeSampler::new(&vol, BoundaryMode::Clamp);

        let ranges = reduce_block_ranges(&sampler, &layout, 64);
        assert_eq!(ranges.len(), 3 * 2 * 2);
        assert_eq!(ranges, brute_force(&vol, &layout));
    }

    #[test]
    fn apron_sees_neighbour_block() {
        // Only voxel x=8 is hot; block 0 must see it through its +x apron.
        let vol = ScalarVolume::from_fn(VolumeSpec::new([16, 8, 8]), |x, _, _| {
            if x == 8 {
                1.0
            } else {
                0.0
            }
        })
        .expect("volume");
        let layout = BlockLayout::new([8, 8, 8], vol.dims()).expect("layout");
        let sampler = VolumeSampler::new(&vol, BoundaryMode::Clamp);
        let ranges = reduce_block_ranges(&sampler, &layout, 16);
        assert_eq!(ranges[0], BlockRange { min: 0.0, max: 1.0 });
        assert_eq!(ranges[1], BlockRange { min: 0.0, max: 1.0 });
    }

    #[test]
    fn single_lane_equals_many_lanes() {
        let vol = ScalarVolume::from_fn(VolumeSpec::new([10, 10, 10]), |x, y, z| {
            ((x * 7 + y * 3 + z) % 11) as f32
        })
        .expect("volume");
        let layout = BlockLayout::new([4, 4, 4], vol.dims()).expect("layout");
        let sampler = VolumeSampler::new(&vol, BoundaryMode::Clamp);
        assert_eq!(
            reduce_block_ranges(&sampler, &layout, 1),
            reduce_block_ranges(&sampler, &layout, 256)
        );
    }
}
