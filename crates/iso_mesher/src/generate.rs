//! Stage 3: table-driven triangle emission for the cells of active blocks.

use glam::Vec3;
use rayon::prelude::*;

use crate::arena::AtomicArena;
use crate::core::{ActiveBlockList, BlockLayout, TriangleBuffer, VolumeSpec};
use crate::error::Result;
use crate::sampler::VolumeSampler;
use crate::tables::{origin_from_bits, CubeTables, CORNER_OFFSETS};

/// A cell emits at most five triangles.
pub const MAX_CELL_VERTICES: usize = 15;

/// Configuration index: bit `i` set when corner `i` is below `threshold`.
#[inline]
pub fn cube_config(values: &[f32; 8], threshold: f32) -> u8 {
    let mut config = 0u8;
    for (i, &v) in values.iter().enumerate() {
        if v < threshold {
            config |= 1 << i;
        }
    }
    config
}

/// Corner samples of the cell whose lower corner is `cell`.
#[inline]
pub fn corner_values(sampler: &VolumeSampler<'_>, cell: [u32; 3]) -> [f32; 8] {
    CORNER_OFFSETS.map(|o| {
        sampler.sample(
            (cell[0] + o[0]) as i64,
            (cell[1] + o[1]) as i64,
            (cell[2] + o[2]) as i64,
        )
    })
}

/// Threshold crossing on one edge, in grid coordinates.
///
/// Equal end values fall back to the edge midpoint.
#[inline]
pub fn interpolate_edge(cell: [u32; 3], values: &[f32; 8], edge: &[u32; 4], threshold: f32) -> Vec3 {
    let va = values[edge[0] as usize];
    let vb = values[edge[1] as usize];
    let denom = vb - va;
    let t = if denom == 0.0 {
        0.5
    } else {
        ((threshold - va) / denom).clamp(0.0, 1.0)
    };
    let o = origin_from_bits(edge[3]);
    let origin = Vec3::new(
        (cell[0] + o[0]) as f32,
        (cell[1] + o[1]) as f32,
        (cell[2] + o[2]) as f32,
    );
    let mut p = origin;
    p[edge[2] as usize] += t;
    p
}

/// Triangulates one cell into `out` (grid coordinates) and returns the
/// number of vertices written, a multiple of three.
pub fn polygonise_cell(
    cell: [u32; 3],
    values: &[f32; 8],
    threshold: f32,
    tables: &CubeTables,
    out: &mut [Vec3; MAX_CELL_VERTICES],
) -> usize {
    let config = cube_config(values, threshold);
    let mask = tables.edge_masks[config as usize];
    if mask == 0 {
        return 0;
    }

    let mut points = [Vec3::ZERO; 12];
    for (e, edge) in tables.edges.iter().enumerate() {
        if mask & (1 << e) != 0 {
            points[e] = interpolate_edge(cell, values, edge, threshold);
        }
    }

    let edges = tables.triangle_edges(config);
    for (slot, &e) in out.iter_mut().zip(edges) {
        *slot = points[e as usize];
    }
    edges.len()
}

#[derive(Debug, Clone, Default)]
pub struct GeneratedTriangles {
    pub triangles: TriangleBuffer,
    pub cells_processed: u64,
    pub regrown: bool,
}

/// Emits the triangles of every cell of every active block.
///
/// Each cell claims its exact vertex count from a shared [`AtomicArena`] of
/// `capacity` vertices. If the claims overrun the arena the pass is repeated
/// once with the exact demand, so the result is never truncated.
pub fn generate_triangles(
    sampler: &VolumeSampler<'_>,
    tables: &CubeTables,
    spec: &VolumeSpec,
    layout: &BlockLayout,
    active: &ActiveBlockList,
    threshold: f32,
    capacity: usize,
) -> Result<GeneratedTriangles> {
    if active.is_empty() {
        return Ok(GeneratedTriangles::default());
    }

    let arena = AtomicArena::with_capacity(capacity)?;
    let cells_processed = emit_pass(sampler, tables, spec, layout, active, threshold, &arena);
    if !arena.overflowed() {
        return Ok(GeneratedTriangles {
            triangles: TriangleBuffer {
                positions: arena.into_positions().unwrap_or_default(),
            },
            cells_processed,
            regrown: false,
        });
    }

    let demanded = arena.demanded();
    log::warn!(
        "vertex arena overflow: capacity {} < demand {}, regenerating",
        capacity,
        demanded
    );
    let arena = AtomicArena::with_capacity(demanded)?;
    emit_pass(sampler, tables, spec, layout, active, threshold, &arena);
    Ok(GeneratedTriangles {
        triangles: TriangleBuffer {
            positions: arena.into_positions().unwrap_or_default(),
        },
        cells_processed,
        regrown: true,
    })
}

fn emit_pass(
    sampler: &VolumeSampler<'_>,
    tables: &CubeTables,
    spec: &VolumeSpec,
    layout: &BlockLayout,
    active: &ActiveBlockList,
    threshold: f32,
    arena: &AtomicArena,
) -> u64 {
    let dims = spec.dims;
    let [bx, by, _] = layout.block_dims;
    let cells_per_block = layout.cells_per_block();

    active
        .indices
        .par_iter()
        .map(|&block| {
            let origin = layout.block_origin(block);
            let mut verts = [Vec3::ZERO; MAX_CELL_VERTICES];
            let mut processed = 0u64;
            for linear in 0..cells_per_block {
                let cell = [
                    origin[0] + linear % bx,
                    origin[1] + (linear / bx) % by,
                    origin[2] + linear / (bx * by),
                ];
                if cell[0] + 1 >= dims[0] || cell[1] + 1 >= dims[1] || cell[2] + 1 >= dims[2] {
                    continue;
                }
                processed += 1;

                let values = corner_values(sampler, cell);
                let n = polygonise_cell(cell, &values, threshold, tables, &mut verts);
                if n == 0 {
                    continue;
                }
                for v in &mut verts[..n] {
                    *v = spec.grid_to_world(*v);
                }
                arena.push(&verts[..n]);
            }
            processed
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::EDGE_TABLE;
    use rand::{Rng, SeedableRng};

    #[test]
    fn uniform_cells_emit_nothing() {
        let tables = CubeTables::standard();
        let mut out = [Vec3::ZERO; MAX_CELL_VERTICES];
        assert_eq!(polygonise_cell([0, 0, 0], &[0.0; 8], 0.5, tables, &mut out), 0);
        assert_eq!(polygonise_cell([0, 0, 0], &[1.0; 8], 0.5, tables, &mut out), 0);
    }

    #[test]
    fn single_hot_corner_is_one_triangle() {
        let tables = CubeTables::standard();
        let mut values = [0.0; 8];
        values[0] = 1.0;
        let mut out = [Vec3::ZERO; MAX_CELL_VERTICES];
        let n = polygonise_cell([2, 3, 4], &values, 0.5, tables, &mut out);
        assert_eq!(n, 3);
        let mut got: Vec<[f32; 3]> = out[..3].iter().map(|v| v.to_array()).collect();
        got.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
        assert_eq!(got, vec![[2.0, 3.0, 4.5], [2.0, 3.5, 4.0], [2.5, 3.0, 4.0]]);
    }

    #[test]
    fn vertices_stay_inside_their_cell() {
        let tables = CubeTables::standard();
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut out = [Vec3::ZERO; MAX_CELL_VERTICES];
        let cell = [5u32, 1, 9];
        let lo = Vec3::new(5.0, 1.0, 9.0);
        let hi = lo + Vec3::ONE;
        for _ in 0..5000 {
            let values: [f32; 8] = std::array::from_fn(|_| rng.gen_range(-1.0..1.0));
            let threshold = rng.gen_range(-0.5..0.5);
            let n = polygonise_cell(cell, &values, threshold, tables, &mut out);
            assert_eq!(n % 3, 0);
            for v in &out[..n] {
                assert!(v.cmpge(lo).all() && v.cmple(hi).all(), "{v:?} outside cell");
            }
        }
    }

    #[test]
    fn degenerate_edge_uses_midpoint() {
        let values = [2.0; 8];
        let p = interpolate_edge([0, 0, 0], &values, &EDGE_TABLE[9], 2.0);
        assert_eq!(p, Vec3::new(1.0, 0.0, 0.5));
    }

    #[test]
    fn shared_edge_is_bit_identical_from_both_cells() {
        // Edge between voxels (1,1,0) and (1,1,1): edge 10 of cell (0,0,0)
        // and edge 11 of cell (1,0,0).
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let a: f32 = rng.gen_range(-1.0..0.0);
        let b: f32 = rng.gen_range(0.0..1.0);
        let mut left = [0.0; 8];
        left[2] = a;
        left[6] = b;
        let mut right = [0.0; 8];
        right[3] = a;
        right[7] = b;
        let p = interpolate_edge([0, 0, 0], &left, &EDGE_TABLE[10], 0.0);
        let q = interpolate_edge([1, 0, 0], &right, &EDGE_TABLE[11], 0.0);
        assert_eq!(p.to_array().map(f32::to_bits), q.to_array().map(f32::to_bits));
    }
}
