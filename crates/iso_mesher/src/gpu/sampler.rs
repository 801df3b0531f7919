//! Device-resident copy of a scalar volume.

use wgpu::util::DeviceExt;

use crate::core::ScalarVolume;
use crate::error::{ExtractError, Result};

use super::GpuExtractor;

/// Volume samples uploaded as a read-only `array<f32>` storage buffer.
///
/// Shaders index it x-fastest and clamp out-of-range coordinates to the edge.
pub struct GpuVolumeSampler {
    pub(crate) buffer: wgpu::Buffer,
    dims: [u32; 3],
}

impl GpuVolumeSampler {
    pub async fn upload(gpu: &GpuExtractor, volume: &ScalarVolume) -> Result<Self> {
        let bytes = (volume.samples().len() as u64).saturating_mul(4);
        gpu.ensure_storage_fits(bytes, "volume samples")?;

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("iso_mesher.volume"),
            contents: bytemuck::cast_slice(volume.samples()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        if gpu.device.pop_error_scope().await.is_some() {
            return Err(ExtractError::ResourceExhausted {
                label: "volume samples".into(),
                bytes,
                limit: gpu.max_storage_buffer_binding_size,
            });
        }

        log::debug!("uploaded {:?} volume ({} bytes)", volume.dims(), bytes);
        Ok(Self {
            buffer,
            dims: volume.dims(),
        })
    }

    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }
}
