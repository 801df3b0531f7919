//! GPU isosurface extraction using wgpu compute shaders.
//!
//! `GpuExtractor` owns the device, the compiled stage pipelines and the
//! uploaded cube tables. Every extraction reuses them; only per-volume
//! buffers are created per call.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::{BlockLayout, VolumeSpec};
use crate::error::{ExtractError, Result};
use crate::tables::CubeTables;

mod buffers;
mod compact;
mod extract;
mod generate;
mod pipelines;
mod reduce;
mod sampler;
mod shaders;

pub(crate) use buffers::{map_buffer, readback_buffer};
use pipelines::create_pipelines;
pub use sampler::GpuVolumeSampler;

/// Uniform block shared by the three stage shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct Params {
    pub dims: [u32; 4],
    pub block_dims: [u32; 4],
    /// `w` holds the total block count.
    pub num_blocks: [u32; 4],
    /// `w` holds the voxel size.
    pub origin_world: [f32; 4],
    pub threshold: f32,
    pub max_vertices: u32,
    pub active_count: u32,
    pub dispatch_width: u32,
}

impl Params {
    pub fn new(spec: &VolumeSpec, layout: &BlockLayout, threshold: f32) -> Self {
        let [nx, ny, nz] = spec.dims;
        let [bx, by, bz] = layout.block_dims;
        let [cx, cy, cz] = layout.num_blocks;
        let o = spec.origin_world;
        Self {
            dims: [nx, ny, nz, 0],
            block_dims: [bx, by, bz, 0],
            num_blocks: [cx, cy, cz, layout.num_blocks_total()],
            origin_world: [o.x, o.y, o.z, spec.voxel_size],
            threshold,
            max_vertices: 0,
            active_count: 0,
            dispatch_width: 1,
        }
    }
}

/// Configuration for the GPU extractor.
#[derive(Debug, Clone, Default)]
pub struct GpuExtractorConfig {
    /// Invocations per workgroup for every stage (0 = auto-detect). Must be
    /// a power of two no larger than 256.
    pub workgroup_size: u32,
}

const MAX_WORKGROUP_SIZE: u32 = 256;

pub struct GpuExtractor {
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) reduce_pipeline: wgpu::ComputePipeline,
    pub(crate) reduce_bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) scan_pipeline: wgpu::ComputePipeline,
    pub(crate) scatter_pipeline: wgpu::ComputePipeline,
    pub(crate) compact_bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) generate_pipeline: wgpu::ComputePipeline,
    pub(crate) generate_bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) edge_table_buf: wgpu::Buffer,
    pub(crate) edge_masks_buf: wgpu::Buffer,
    pub(crate) tri_table_buf: wgpu::Buffer,
    pub(crate) workgroup_size: u32,
    pub(crate) max_invocations: u32,
    pub(crate) max_storage_buffer_binding_size: u64,
    pub(crate) max_storage_buffers_per_shader_stage: u32,
    pub(crate) max_compute_workgroups_per_dimension: u32,
}

/// Summary of the device limits that shape an extraction.
#[derive(Debug, Clone, Copy)]
pub struct GpuLimitsSummary {
    pub max_invocations_per_workgroup: u32,
    pub max_storage_buffers_per_shader_stage: u32,
    pub max_storage_buffer_binding_size: u64,
    pub max_compute_workgroups_per_dimension: u32,
}

impl GpuExtractor {
    /// Acquires a device, compiles the stage pipelines and uploads the cube
    /// tables.
    pub async fn new(config: GpuExtractorConfig) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or(ExtractError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|e| ExtractError::Device(e.to_string()))?;

        let limits = device.limits();
        let max_invocations = limits.max_compute_invocations_per_workgroup;
        let workgroup_size = compute_workgroup_size(&config, max_invocations)?;

        let pipelines = create_pipelines(&device, workgroup_size).await?;

        let tables = CubeTables::standard();
        let edge_table_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("iso_mesher.edge_table"),
            contents: bytemuck::cast_slice(&tables.gpu_edges()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let edge_masks_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("iso_mesher.edge_masks"),
            contents: bytemuck::cast_slice(&tables.gpu_edge_masks()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let tri_table_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("iso_mesher.tri_table"),
            contents: bytemuck::cast_slice(&tables.gpu_triangles()),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let extractor = Self {
            adapter,
            device,
            queue,
            reduce_pipeline: pipelines.reduce_pipeline,
            reduce_bind_group_layout: pipelines.reduce_bind_group_layout,
            scan_pipeline: pipelines.scan_pipeline,
            scatter_pipeline: pipelines.scatter_pipeline,
            compact_bind_group_layout: pipelines.compact_bind_group_layout,
            generate_pipeline: pipelines.generate_pipeline,
            generate_bind_group_layout: pipelines.generate_bind_group_layout,
            edge_table_buf,
            edge_masks_buf,
            tri_table_buf,
            workgroup_size,
            max_invocations,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size as u64,
            max_storage_buffers_per_shader_stage: limits.max_storage_buffers_per_shader_stage,
            max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        };
        log::info!(
            "GPU extractor on {:?}: workgroup size {}, {:?}",
            extractor.adapter.get_info().name,
            workgroup_size,
            extractor.limits_summary()
        );
        Ok(extractor)
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn limits_summary(&self) -> GpuLimitsSummary {
        GpuLimitsSummary {
            max_invocations_per_workgroup: self.max_invocations,
            max_storage_buffers_per_shader_stage: self.max_storage_buffers_per_shader_stage,
            max_storage_buffer_binding_size: self.max_storage_buffer_binding_size,
            max_compute_workgroups_per_dimension: self.max_compute_workgroups_per_dimension,
        }
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Validates that a buffer size fits within device limits.
    pub(crate) fn ensure_storage_fits(&self, bytes: u64, label: &str) -> Result<()> {
        if bytes > self.max_storage_buffer_binding_size {
            return Err(ExtractError::ResourceExhausted {
                label: label.to_string(),
                bytes,
                limit: self.max_storage_buffer_binding_size,
            });
        }
        Ok(())
    }

    /// Folds `workgroups` into an `(x, y)` grid within the per-dimension
    /// limit. Shaders recover the flat index as `x + y * width`.
    pub(crate) fn dispatch_grid(&self, workgroups: u32, label: &str) -> Result<(u32, u32)> {
        dispatch_grid(workgroups, self.max_compute_workgroups_per_dimension).ok_or_else(|| {
            ExtractError::Validation(format!(
                "{label}: {} workgroups exceed a {}x{} dispatch",
                workgroups,
                self.max_compute_workgroups_per_dimension,
                self.max_compute_workgroups_per_dimension
            ))
        })
    }

    pub(crate) fn params_buffer(&self, params: &Params, label: &str) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }
}

fn dispatch_grid(workgroups: u32, max_per_dim: u32) -> Option<(u32, u32)> {
    if workgroups <= max_per_dim {
        return Some((workgroups, 1));
    }
    let height = (workgroups - 1) / max_per_dim + 1;
    (height <= max_per_dim).then_some((max_per_dim, height))
}

/// Picks the workgroup size from config and device limits.
fn compute_workgroup_size(config: &GpuExtractorConfig, max_invocations: u32) -> Result<u32> {
    let cap = MAX_WORKGROUP_SIZE.min(max_invocations);
    if config.workgroup_size == 0 {
        // Largest power of two not above the cap.
        return Ok(1 << (31 - cap.max(1).leading_zeros()));
    }
    let size = config.workgroup_size;
    if !size.is_power_of_two() || size > cap {
        return Err(ExtractError::InvalidConfig(format!(
            "workgroup_size must be a power of two <= {cap} (got {size})"
        )));
    }
    Ok(size)
}
