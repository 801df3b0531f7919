use crate::error::Result;

use super::{GpuExtractor, GpuVolumeSampler, Params};

impl GpuExtractor {
    /// Records the block min/max pass into `encoder`. Returns the
    /// `vec2<f32>`-per-block range buffer.
    pub(crate) fn encode_reduce(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        sampler: &GpuVolumeSampler,
        params: &Params,
    ) -> Result<wgpu::Buffer> {
        let num_blocks = params.num_blocks[3];
        let range_bytes = (num_blocks as u64).saturating_mul(8);
        self.ensure_storage_fits(range_bytes, "block ranges")?;

        let ranges_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("iso_mesher.block_ranges"),
            size: range_bytes.max(8),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let (width, height) = self.dispatch_grid(num_blocks, "reduce dispatch")?;
        let params_buf = self.params_buffer(
            &Params {
                dispatch_width: width.max(1),
                ..*params
            },
            "iso_mesher.reduce.params",
        );

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("iso_mesher.reduce.bind_group"),
            layout: &self.reduce_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: sampler.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: ranges_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: params_buf.as_entire_binding() },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("iso_mesher.reduce.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reduce_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(width, height, 1);
        }
        Ok(ranges_buf)
    }
}
