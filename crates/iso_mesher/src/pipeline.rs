//! CPU extraction pipeline.

use std::path::Path;

use crate::compact::compact_active_blocks;
use crate::core::{
    estimate_vertex_capacity, BlockLayout, DispatchStats, ExtractOpts, ExtractionOutput,
    ScalarVolume, TriangleBuffer,
};
use crate::error::{ExtractError, Result};
use crate::generate::generate_triangles;
use crate::reduce::reduce_block_ranges;
use crate::sampler::VolumeSampler;
use crate::tables::CubeTables;
use crate::volume_io::load_volume;

/// Loads a volume file and extracts the `threshold` isosurface with default
/// options.
pub fn extract_surface<P: AsRef<Path>>(path: P, threshold: f32) -> Result<TriangleBuffer> {
    let volume = load_volume(path)?;
    let output = extract_volume(&volume, threshold, &ExtractOpts::default())?;
    Ok(output.triangles)
}

/// Runs the three stages on the CPU. Each stage completes before the next
/// one starts.
pub fn extract_volume(
    volume: &ScalarVolume,
    threshold: f32,
    opts: &ExtractOpts,
) -> Result<ExtractionOutput> {
    opts.validate()?;
    if threshold.is_nan() {
        return Err(ExtractError::InvalidConfig("threshold is NaN".into()));
    }

    let spec = volume.spec();
    let layout = BlockLayout::new(opts.block_dims, spec.dims)?;
    let sampler = VolumeSampler::new(volume, opts.boundary);
    let tables = CubeTables::standard();

    let block_ranges = reduce_block_ranges(&sampler, &layout, opts.reduce_lanes);
    log::debug!(
        "reduced {} blocks of {:?} over {:?} voxels",
        block_ranges.len(),
        layout.block_dims,
        spec.dims
    );

    let active = compact_active_blocks(&block_ranges, threshold);
    log::debug!(
        "{} of {} blocks straddle threshold {}",
        active.count(),
        block_ranges.len(),
        threshold
    );

    let capacity = opts
        .vertex_capacity
        .unwrap_or_else(|| estimate_vertex_capacity(&layout, active.count()));
    let generated =
        generate_triangles(&sampler, tables, spec, &layout, &active, threshold, capacity)?;

    let stats = DispatchStats {
        blocks_total: layout.num_blocks_total(),
        blocks_active: active.count(),
        cells_processed: generated.cells_processed,
        vertices: generated.triangles.vertex_count() as u32,
        regrown: generated.regrown,
    };
    log::info!(
        "extracted {} triangles from {}/{} active blocks{}",
        generated.triangles.triangle_count(),
        stats.blocks_active,
        stats.blocks_total,
        if stats.regrown { " (output regrown)" } else { "" }
    );

    Ok(ExtractionOutput {
        block_ranges,
        active,
        triangles: generated.triangles,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockRange, VolumeSpec};
    use crate::generate::{corner_values, polygonise_cell, MAX_CELL_VERTICES};
    use crate::sampler::BoundaryMode;
    use crate::volume_io::{write_volume, SampleFormat};
    use glam::Vec3;
    use std::collections::{HashMap, HashSet};

    fn sphere(dims: u32, center: Vec3) -> ScalarVolume {
        ScalarVolume::from_fn(VolumeSpec::new([dims; 3]), |x, y, z| {
            (Vec3::new(x as f32, y as f32, z as f32) - center).length()
        })
        .expect("volume")
    }

    fn sorted_triangles(buf: &TriangleBuffer) -> Vec<[u32; 9]> {
        let mut tris: Vec<[u32; 9]> = buf
            .positions
            .chunks_exact(9)
            .map(|t| std::array::from_fn(|i| t[i].to_bits()))
            .collect();
        tris.sort_unstable();
        tris
    }

    #[test]
    fn uniform_volume_has_no_active_blocks() {
        let vol = ScalarVolume::new(VolumeSpec::new([16, 16, 16]), vec![0.0; 16 * 16 * 16])
            .expect("volume");
        let out = extract_volume(&vol, 1.0, &ExtractOpts::default()).expect("extract");
        assert_eq!(out.block_ranges.len(), 8);
        assert!(out.active.is_empty());
        assert!(out.triangles.is_empty());
        assert_eq!(out.stats.blocks_active, 0);
        assert_eq!(out.stats.cells_processed, 0);
    }

    #[test]
    fn single_hot_corner_yields_one_triangle() {
        let vol = ScalarVolume::from_fn(VolumeSpec::new([8, 8, 8]), |x, y, z| {
            if (x, y, z) == (0, 0, 0) {
                1.0
            } else {
                0.0
            }
        })
        .expect("volume");
        let out = extract_volume(&vol, 0.5, &ExtractOpts::default()).expect("extract");
        assert_eq!(out.active.indices, vec![0]);
        assert_eq!(out.triangles.triangle_count(), 1);
        assert_eq!(out.stats.cells_processed, 7 * 7 * 7);
    }

    #[test]
    fn sphere_is_closed_with_expected_area() {
        let r = 20.0;
        let vol = sphere(64, Vec3::new(31.7, 32.3, 31.9));
        let out = extract_volume(&vol, r, &ExtractOpts::default()).expect("extract");

        let area = out.triangles.surface_area();
        let expected = 4.0 * std::f32::consts::PI * r * r;
        assert!(
            ((area - expected) / expected).abs() < 0.05,
            "area {area} vs {expected}"
        );

        // Weld bit-identical vertices and check every edge joins two triangles.
        let mut ids: HashMap<[u32; 3], usize> = HashMap::new();
        let mut edges: HashMap<(usize, usize), u32> = HashMap::new();
        for tri in out.triangles.triangles() {
            let v = tri.map(|p| {
                let next = ids.len();
                *ids.entry(p.to_array().map(f32::to_bits)).or_insert(next)
            });
            for (a, b) in [(v[0], v[1]), (v[1], v[2]), (v[2], v[0])] {
                *edges.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        assert!(edges.values().all(|&n| n == 2), "surface has open edges");
        let euler = ids.len() as i64 - edges.len() as i64 + out.triangles.triangle_count() as i64;
        assert_eq!(euler, 2);
    }

    #[test]
    fn work_is_bounded_by_active_blocks() {
        let vol = sphere(48, Vec3::new(23.7, 24.3, 23.9));
        let opts = ExtractOpts::default();
        let out = extract_volume(&vol, 10.0, &opts).expect("extract");
        let layout = BlockLayout::new(opts.block_dims, vol.dims()).expect("layout");
        assert!(out.stats.blocks_active < out.stats.blocks_total);
        assert!(
            out.stats.cells_processed
                <= out.stats.blocks_active as u64 * layout.cells_per_block() as u64
        );
        assert_eq!(out.stats.vertices as usize, out.triangles.vertex_count());
    }

    #[test]
    fn repeated_runs_give_the_same_triangle_set() {
        let vol = sphere(32, Vec3::new(15.2, 16.6, 14.9));
        let opts = ExtractOpts::default();
        let a = extract_volume(&vol, 9.0, &opts).expect("extract");
        let b = extract_volume(&vol, 9.0, &opts).expect("extract");
        assert_eq!(a.active, b.active);
        assert_eq!(sorted_triangles(&a.triangles), sorted_triangles(&b.triangles));
    }

    #[test]
    fn block_shape_does_not_change_the_surface() {
        let vol = ScalarVolume::from_fn(VolumeSpec::new([29, 23, 31]), |x, y, z| {
            (x as f32 * 0.31).sin() + (y as f32 * 0.23).cos() * (z as f32 * 0.17).sin()
        })
        .expect("volume");

        // Every cell of the grid, no blocks involved.
        let sampler = VolumeSampler::new(&vol, BoundaryMode::Clamp);
        let tables = CubeTables::standard();
        let mut brute = Vec::new();
        let mut verts = [Vec3::ZERO; MAX_CELL_VERTICES];
        for z in 0..30 {
            for y in 0..22 {
                for x in 0..28 {
                    let values = corner_values(&sampler, [x, y, z]);
                    let n = polygonise_cell([x, y, z], &values, 0.2, tables, &mut verts);
                    brute.extend(verts[..n].iter().flat_map(|v| v.to_array()));
                }
            }
        }
        let expected = sorted_triangles(&TriangleBuffer { positions: brute });
        assert!(!expected.is_empty());

        for block_dims in [[8, 8, 8], [4, 4, 4], [5, 3, 7], [1, 1, 1], [32, 32, 32]] {
            let opts = ExtractOpts {
                block_dims,
                ..ExtractOpts::default()
            };
            let out = extract_volume(&vol, 0.2, &opts).expect("extract");
            assert_eq!(sorted_triangles(&out.triangles), expected, "{block_dims:?}");
        }
    }

    #[test]
    fn undersized_output_is_regrown_not_truncated() {
        let vol = sphere(32, Vec3::new(15.2, 16.6, 14.9));
        let full = extract_volume(&vol, 9.0, &ExtractOpts::default()).expect("extract");
        let tiny = extract_volume(
            &vol,
            9.0,
            &ExtractOpts {
                vertex_capacity: Some(3),
                ..ExtractOpts::default()
            },
        )
        .expect("extract");
        assert!(tiny.stats.regrown);
        assert_eq!(sorted_triangles(&tiny.triangles), sorted_triangles(&full.triangles));
    }

    #[test]
    fn vertices_are_placed_in_world_space() {
        let mut spec = VolumeSpec::new([8, 8, 8]);
        spec.origin_world = Vec3::new(-10.0, 5.0, 2.0);
        spec.voxel_size = 0.5;
        let vol = ScalarVolume::from_fn(spec, |x, y, z| {
            if (x, y, z) == (0, 0, 0) {
                1.0
            } else {
                0.0
            }
        })
        .expect("volume");
        let out = extract_volume(&vol, 0.5, &ExtractOpts::default()).expect("extract");
        let got: HashSet<[u32; 3]> = out
            .triangles
            .positions
            .chunks_exact(3)
            .map(|p| [p[0].to_bits(), p[1].to_bits(), p[2].to_bits()])
            .collect();
        let expected: HashSet<[u32; 3]> = [
            [-9.75, 5.0, 2.0],
            [-10.0, 5.25, 2.0],
            [-10.0, 5.0, 2.25],
        ]
        .into_iter()
        .map(|p: [f32; 3]| p.map(f32::to_bits))
        .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn rejects_bad_options() {
        let vol = sphere(8, Vec3::splat(3.5));
        let opts = ExtractOpts {
            reduce_lanes: 3,
            ..ExtractOpts::default()
        };
        assert!(matches!(
            extract_volume(&vol, 1.0, &opts),
            Err(ExtractError::InvalidConfig(_))
        ));
        assert!(extract_volume(&vol, f32::NAN, &ExtractOpts::default()).is_err());
    }

    #[test]
    fn blocks_larger_than_the_grid_are_one_block() {
        let vol = sphere(8, Vec3::splat(3.5));
        let opts = ExtractOpts {
            block_dims: [2048, 2048, 2048],
            ..ExtractOpts::default()
        };
        let out = extract_volume(&vol, 2.5, &opts).expect("extract");
        let reference = extract_volume(&vol, 2.5, &ExtractOpts::default()).expect("extract");
        assert_eq!(out.stats.blocks_total, 1);
        assert_eq!(out.stats.cells_processed, 7 * 7 * 7);
        assert_eq!(sorted_triangles(&out.triangles), sorted_triangles(&reference.triangles));
    }

    #[test]
    fn unallocatable_output_is_resource_exhausted() {
        let vol = sphere(8, Vec3::splat(3.5));
        let opts = ExtractOpts {
            vertex_capacity: Some(usize::MAX / 2),
            ..ExtractOpts::default()
        };
        assert!(matches!(
            extract_volume(&vol, 2.5, &opts),
            Err(ExtractError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn boundary_mode_does_not_change_the_surface() {
        let vol = sphere(12, Vec3::new(5.2, 5.9, 6.3));
        let clamp = extract_volume(&vol, 4.0, &ExtractOpts::default()).expect("extract");
        let constant = extract_volume(
            &vol,
            4.0,
            &ExtractOpts {
                boundary: BoundaryMode::Constant(-100.0),
                ..ExtractOpts::default()
            },
        )
        .expect("extract");
        assert!(!clamp.triangles.is_empty());
        assert_eq!(clamp.block_ranges, constant.block_ranges);
        assert_eq!(sorted_triangles(&clamp.triangles), sorted_triangles(&constant.triangles));
    }

    #[test]
    fn nan_samples_are_left_out_of_block_ranges() {
        let vol = ScalarVolume::from_fn(VolumeSpec::new([4, 4, 4]), |x, y, z| {
            if (x, y, z) == (1, 1, 1) {
                f32::NAN
            } else {
                (x + y + z) as f32
            }
        })
        .expect("volume");
        let out = extract_volume(&vol, 4.5, &ExtractOpts::default()).expect("extract");
        assert_eq!(out.block_ranges, vec![BlockRange { min: 0.0, max: 9.0 }]);
    }

    #[test]
    fn extract_surface_reads_volume_file() {
        let vol = sphere(24, Vec3::new(11.6, 12.2, 11.3));
        let path = std::env::temp_dir().join(format!("iso_mesher_pipeline_{}.isov", std::process::id()));
        let mut file = std::fs::File::create(&path).expect("create");
        write_volume(&mut file, &vol, SampleFormat::F32).expect("write");
        drop(file);

        let from_file = extract_surface(&path, 7.5).expect("extract");
        let _ = std::fs::remove_file(&path);
        let direct = extract_volume(&vol, 7.5, &ExtractOpts::default()).expect("extract");
        assert!(!from_file.is_empty());
        assert_eq!(sorted_triangles(&from_file), sorted_triangles(&direct.triangles));
    }
}
