use crate::core::TriangleBuffer;
use crate::error::Result;

use super::compact::CompactedBlocks;
use super::{map_buffer, readback_buffer, GpuExtractor, GpuVolumeSampler, Params};

pub(crate) struct GpuTriangles {
    pub triangles: TriangleBuffer,
    pub regrown: bool,
}

impl GpuExtractor {
    /// Runs triangle generation over the active blocks. If the vertex counter
    /// ends above `capacity`, the pass is repeated once with the exact size.
    pub(crate) async fn generate_triangles(
        &self,
        sampler: &GpuVolumeSampler,
        blocks: &CompactedBlocks,
        params: &Params,
        capacity: usize,
    ) -> Result<GpuTriangles> {
        if blocks.active.is_empty() {
            return Ok(GpuTriangles {
                triangles: TriangleBuffer::default(),
                regrown: false,
            });
        }

        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
        let (demand, positions) = self.generate_pass(sampler, blocks, params, capacity).await?;
        if demand <= capacity {
            return Ok(GpuTriangles {
                triangles: TriangleBuffer { positions },
                regrown: false,
            });
        }

        log::warn!(
            "vertex buffer overflow: capacity {} < demand {}, regenerating",
            capacity,
            demand
        );
        let (_, positions) = self.generate_pass(sampler, blocks, params, demand).await?;
        Ok(GpuTriangles {
            triangles: TriangleBuffer { positions },
            regrown: true,
        })
    }

    /// One generation dispatch. Returns the final counter value and the
    /// positions that fit.
    async fn generate_pass(
        &self,
        sampler: &GpuVolumeSampler,
        blocks: &CompactedBlocks,
        params: &Params,
        max_vertices: u32,
    ) -> Result<(u32, Vec<f32>)> {
        let vertex_bytes = (max_vertices as u64).saturating_mul(12);
        self.ensure_storage_fits(vertex_bytes, "output vertices")?;

        let out_vertices = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("iso_mesher.generate.vertices"),
            size: vertex_bytes.max(12),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counter = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("iso_mesher.generate.counter"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let active_count = blocks.active.count();
        let (width, height) = self.dispatch_grid(active_count, "generate dispatch")?;
        let params_buf = self.params_buffer(
            &Params {
                max_vertices,
                active_count,
                dispatch_width: width.max(1),
                ..*params
            },
            "iso_mesher.generate.params",
        );
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("iso_mesher.generate.bind_group"),
            layout: &self.generate_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: sampler.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: self.edge_table_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.edge_masks_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: self.tri_table_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: blocks.buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: out_vertices.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: counter.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: params_buf.as_entire_binding() },
            ],
        });

        let read_counter = readback_buffer(&self.device, "iso_mesher.generate.read_counter", 4);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("iso_mesher.generate.encoder"),
        });
        encoder.clear_buffer(&counter, 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("iso_mesher.generate.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.generate_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(width, height, 1);
        }
        encoder.copy_buffer_to_buffer(&counter, 0, &read_counter, 0, 4);
        self.queue.submit([encoder.finish()]);

        let demand = map_buffer::<u32>(&read_counter, &self.device)
            .await?
            .first()
            .copied()
            .unwrap_or(0);
        if demand > max_vertices || demand == 0 {
            return Ok((demand, Vec::new()));
        }

        let used_bytes = demand as u64 * 12;
        let read_vertices = readback_buffer(&self.device, "iso_mesher.generate.read_vertices", used_bytes);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("iso_mesher.generate.readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(&out_vertices, 0, &read_vertices, 0, used_bytes);
        self.queue.submit([encoder.finish()]);
        let positions = map_buffer(&read_vertices, &self.device).await?;
        Ok((demand, positions))
    }
}
