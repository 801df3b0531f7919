//! Block-accelerated marching cubes.
//!
//! Extraction runs in three stages over a blocked scalar volume: a per-block
//! min/max reduction, compaction of the blocks whose range straddles the
//! threshold, and table-driven triangle generation over the cells of those
//! blocks only. The stages run either on the CPU ([`extract_volume`]) or on a
//! wgpu device ([`GpuExtractor`]).

pub mod arena;
pub mod compact;
pub mod core;
pub mod error;
pub mod generate;
pub mod gpu;
pub mod pipeline;
pub mod primitives;
pub mod reduce;
pub mod sampler;
pub mod tables;
pub mod volume_io;

pub use crate::core::{
    ActiveBlockList, BlockLayout, BlockRange, DispatchStats, ExtractOpts, ExtractionOutput,
    ScalarVolume, TriangleBuffer, VolumeSpec,
};
pub use crate::error::{ExtractError, Result};
pub use crate::gpu::{GpuExtractor, GpuExtractorConfig, GpuVolumeSampler};
pub use crate::pipeline::{extract_surface, extract_volume};
pub use crate::sampler::{BoundaryMode, VolumeSampler};
pub use crate::tables::CubeTables;
