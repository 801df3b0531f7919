use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::{ExtractError, Result};
use crate::sampler::BoundaryMode;

#[derive(Debug, Clone)]
pub struct VolumeSpec {
    pub dims: [u32; 3],
    pub origin_world: Vec3,
    pub voxel_size: f32,
}

impl VolumeSpec {
    pub fn new(dims: [u32; 3]) -> Self {
        Self {
            dims,
            origin_world: Vec3::ZERO,
            voxel_size: 1.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dims.iter().any(|&d| d < 2) {
            return Err(ExtractError::InvalidVolume(format!(
                "dims must be >= 2 on every axis (got {:?})",
                self.dims
            )));
        }
        if !self.voxel_size.is_finite() || self.voxel_size <= 0.0 {
            return Err(ExtractError::InvalidVolume(
                "voxel_size must be finite and > 0".into(),
            ));
        }
        if !self.origin_world.is_finite() {
            return Err(ExtractError::InvalidVolume("origin_world must be finite".into()));
        }
        Ok(())
    }

    pub fn num_voxels(&self) -> u64 {
        self.dims[0] as u64 * self.dims[1] as u64 * self.dims[2] as u64
    }

    pub fn num_cells(&self) -> u64 {
        let cells = |d: u32| d.saturating_sub(1) as u64;
        cells(self.dims[0]) * cells(self.dims[1]) * cells(self.dims[2])
    }

    /// Linear index of an in-range voxel, x fastest.
    #[inline]
    pub fn linear_index(&self, x: u32, y: u32, z: u32) -> usize {
        (x as usize)
            + (self.dims[0] as usize) * ((y as usize) + (self.dims[1] as usize) * (z as usize))
    }

    /// Maps a point in grid coordinates to world space.
    #[inline]
    pub fn grid_to_world(&self, p: Vec3) -> Vec3 {
        self.origin_world + p * self.voxel_size
    }
}

/// Immutable dense scalar grid.
#[derive(Debug, Clone)]
pub struct ScalarVolume {
    spec: VolumeSpec,
    samples: Vec<f32>,
}

impl ScalarVolume {
    pub fn new(spec: VolumeSpec, samples: Vec<f32>) -> Result<Self> {
        spec.validate()?;
        if samples.len() as u64 != spec.num_voxels() {
            return Err(ExtractError::InvalidVolume(format!(
                "sample count {} does not match dims {:?} ({} voxels)",
                samples.len(),
                spec.dims,
                spec.num_voxels()
            )));
        }
        Ok(Self { spec, samples })
    }

    /// Builds a volume by evaluating `f` at every voxel.
    pub fn from_fn<F>(spec: VolumeSpec, f: F) -> Result<Self>
    where
        F: Fn(u32, u32, u32) -> f32,
    {
        spec.validate()?;
        let [nx, ny, nz] = spec.dims;
        let mut samples = Vec::with_capacity(spec.num_voxels() as usize);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    samples.push(f(x, y, z));
                }
            }
        }
        Self::new(spec, samples)
    }

    pub fn spec(&self) -> &VolumeSpec {
        &self.spec
    }

    pub fn dims(&self) -> [u32; 3] {
        self.spec.dims
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> f32 {
        self.samples[self.spec.linear_index(x, y, z)]
    }
}

/// Partition of the volume into fixed-size blocks.
///
/// A block owns the cells whose lower corner lies inside it. Blocks at the
/// high end of an axis may be partial.
#[derive(Debug, Clone)]
pub struct BlockLayout {
    pub block_dims: [u32; 3],
    pub num_blocks: [u32; 3],
}

impl BlockLayout {
    /// Block dimensions larger than the grid are clamped to it, so one block
    /// never spans more voxels than the volume holds.
    pub fn new(block_dims: [u32; 3], grid_dims: [u32; 3]) -> Result<Self> {
        if block_dims.iter().any(|&d| d == 0) {
            return Err(ExtractError::InvalidConfig("block_dims must be >= 1".into()));
        }
        let block_dims = [0, 1, 2].map(|k| block_dims[k].min(grid_dims[k].max(1)));
        let num_blocks = [0, 1, 2].map(|k| grid_dims[k].div_ceil(block_dims[k]));
        let fits = |d: [u32; 3]| d[0].checked_mul(d[1]).and_then(|p| p.checked_mul(d[2]));
        if fits(num_blocks).is_none() || fits(block_dims).is_none() {
            return Err(ExtractError::InvalidConfig(format!(
                "block_dims {block_dims:?} over grid {grid_dims:?} overflow the block index space"
            )));
        }
        Ok(Self { block_dims, num_blocks })
    }

    pub fn num_blocks_total(&self) -> u32 {
        self.num_blocks[0] * self.num_blocks[1] * self.num_blocks[2]
    }

    pub fn cells_per_block(&self) -> u32 {
        self.block_dims[0] * self.block_dims[1] * self.block_dims[2]
    }

    pub fn block_coord(&self, index: u32) -> [u32; 3] {
        [
            index % self.num_blocks[0],
            (index / self.num_blocks[0]) % self.num_blocks[1],
            index / (self.num_blocks[0] * self.num_blocks[1]),
        ]
    }

    pub fn block_origin(&self, index: u32) -> [u32; 3] {
        let c = self.block_coord(index);
        [
            c[0] * self.block_dims[0],
            c[1] * self.block_dims[1],
            c[2] * self.block_dims[2],
        ]
    }

    /// Voxel range `[lo, hi)` read by the block's reduction: the block itself
    /// plus the +1 apron its cells reach into, clamped to the grid.
    pub fn footprint(&self, index: u32, grid_dims: [u32; 3]) -> ([u32; 3], [u32; 3]) {
        let lo = self.block_origin(index);
        let hi = [
            lo[0].saturating_add(self.block_dims[0]).saturating_add(1).min(grid_dims[0]),
            lo[1].saturating_add(self.block_dims[1]).saturating_add(1).min(grid_dims[1]),
            lo[2].saturating_add(self.block_dims[2]).saturating_add(1).min(grid_dims[2]),
        ];
        (lo, hi)
    }

    /// Number of in-range cells owned by the block.
    pub fn valid_cells(&self, index: u32, grid_dims: [u32; 3]) -> u64 {
        let origin = self.block_origin(index);
        (0..3)
            .map(|k| {
                let cells = grid_dims[k].saturating_sub(1);
                cells.saturating_sub(origin[k]).min(self.block_dims[k]) as u64
            })
            .product()
    }
}

/// Per-block value interval. Laid out as a WGSL `vec2<f32>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockRange {
    pub min: f32,
    pub max: f32,
}

impl BlockRange {
    pub const EMPTY: BlockRange = BlockRange {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    #[inline]
    pub fn of(value: f32) -> Self {
        Self { min: value, max: value }
    }

    #[inline]
    pub fn union(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn straddles(&self, threshold: f32) -> bool {
        self.min <= threshold && threshold <= self.max
    }
}

/// Compacted indices of the blocks whose range straddles the threshold,
/// in ascending block order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveBlockList {
    pub indices: Vec<u32>,
}

impl ActiveBlockList {
    pub fn count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Unindexed triangle soup: 3 floats per vertex, 3 vertices per triangle.
///
/// Triangle order is unspecified; it depends on how concurrent cells won the
/// output counter.
#[derive(Debug, Clone, Default)]
pub struct TriangleBuffer {
    pub positions: Vec<f32>,
}

impl TriangleBuffer {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 9
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.positions.chunks_exact(9).map(|t| {
            [
                Vec3::new(t[0], t[1], t[2]),
                Vec3::new(t[3], t[4], t[5]),
                Vec3::new(t[6], t[7], t[8]),
            ]
        })
    }

    pub fn surface_area(&self) -> f32 {
        self.triangles()
            .map(|[a, b, c]| 0.5 * (b - a).cross(c - a).length())
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOpts {
    pub block_dims: [u32; 3],
    /// Lanes per block in the CPU tree reduction. Must be a power of two.
    pub reduce_lanes: usize,
    /// Initial output size in vertices. `None` estimates from the active
    /// block count; the buffer is regrown once if the estimate is short.
    pub vertex_capacity: Option<usize>,
    /// Policy of the CPU sampler for out-of-range lookups. Extraction only
    /// reads in-range corners, so this does not change the extracted
    /// surface; it matters to callers sampling the volume themselves. The
    /// GPU backend always clamps.
    pub boundary: BoundaryMode,
}

impl Default for ExtractOpts {
    fn default() -> Self {
        Self {
            block_dims: [8, 8, 8],
            reduce_lanes: 64,
            vertex_capacity: None,
            boundary: BoundaryMode::Clamp,
        }
    }
}

impl ExtractOpts {
    pub fn validate(&self) -> Result<()> {
        if self.block_dims.iter().any(|&d| d == 0) {
            return Err(ExtractError::InvalidConfig("block_dims must be >= 1".into()));
        }
        if !self.reduce_lanes.is_power_of_two() {
            return Err(ExtractError::InvalidConfig(format!(
                "reduce_lanes must be a power of two (got {})",
                self.reduce_lanes
            )));
        }
        Ok(())
    }
}

/// Rough output size for `active` blocks: two triangles per cell face area
/// of the block, which holds for smooth surfaces.
pub fn estimate_vertex_capacity(layout: &BlockLayout, active: u32) -> usize {
    let [bx, by, bz] = layout.block_dims.map(|d| d as usize);
    let per_block = (bx * by + by * bz + bx * bz) * 2 * 3;
    (active as usize).saturating_mul(per_block).max(3)
}

#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub blocks_total: u32,
    pub blocks_active: u32,
    pub cells_processed: u64,
    pub vertices: u32,
    /// The output buffer was too small on the first generation pass.
    pub regrown: bool,
}

/// Result of a full extraction, with the intermediate stage outputs kept for
/// inspection.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub block_ranges: Vec<BlockRange>,
    pub active: ActiveBlockList,
    pub triangles: TriangleBuffer,
    pub stats: DispatchStats,
}
