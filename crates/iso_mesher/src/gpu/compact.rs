//! Active block compaction: workgroup-local scan, host scan of the group
//! totals, then scatter.

use crate::core::ActiveBlockList;
use crate::error::Result;
use crate::primitives::exclusive_scan;

use super::{map_buffer, readback_buffer, GpuExtractor, Params};

pub(crate) struct CompactedBlocks {
    pub active: ActiveBlockList,
    /// Device copy of `active.indices`, at least 4 bytes long.
    pub buffer: wgpu::Buffer,
}

impl GpuExtractor {
    pub(crate) async fn compact_blocks(
        &self,
        ranges_buf: &wgpu::Buffer,
        params: &Params,
    ) -> Result<CompactedBlocks> {
        let num_blocks = params.num_blocks[3];
        let groups = (num_blocks + self.workgroup_size - 1) / self.workgroup_size;
        let index_bytes = (num_blocks as u64).saturating_mul(4);
        self.ensure_storage_fits(index_bytes, "compact offsets")?;

        let local_offsets = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("iso_mesher.compact.local_offsets"),
            size: index_bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let group_bytes = (groups as u64 * 4).max(4);
        let group_sums = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("iso_mesher.compact.group_sums"),
            size: group_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let active_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("iso_mesher.compact.active_blocks"),
            size: index_bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let (width, height) = self.dispatch_grid(groups, "compact dispatch")?;
        let params_buf = self.params_buffer(
            &Params {
                dispatch_width: width.max(1),
                ..*params
            },
            "iso_mesher.compact.params",
        );
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("iso_mesher.compact.bind_group"),
            layout: &self.compact_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: ranges_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: local_offsets.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: group_sums.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: active_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: params_buf.as_entire_binding() },
            ],
        });

        let read_sums = readback_buffer(&self.device, "iso_mesher.compact.read_group_sums", group_bytes);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("iso_mesher.compact.scan_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("iso_mesher.compact.scan_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.scan_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(width, height, 1);
        }
        encoder.copy_buffer_to_buffer(&group_sums, 0, &read_sums, 0, group_bytes);
        self.queue.submit([encoder.finish()]);

        let sums: Vec<u32> = map_buffer(&read_sums, &self.device).await?;
        let (group_offsets, count) = exclusive_scan(&sums[..groups as usize], 0u32, |a, b| a + b);
        if count == 0 {
            return Ok(CompactedBlocks {
                active: ActiveBlockList::default(),
                buffer: active_buf,
            });
        }
        self.queue
            .write_buffer(&group_sums, 0, bytemuck::cast_slice(&group_offsets));

        let active_bytes = count as u64 * 4;
        let read_active = readback_buffer(&self.device, "iso_mesher.compact.read_active", active_bytes);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("iso_mesher.compact.scatter_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("iso_mesher.compact.scatter_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.scatter_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(width, height, 1);
        }
        encoder.copy_buffer_to_buffer(&active_buf, 0, &read_active, 0, active_bytes);
        self.queue.submit([encoder.finish()]);

        let indices = map_buffer(&read_active, &self.device).await?;
        Ok(CompactedBlocks {
            active: ActiveBlockList { indices },
            buffer: active_buf,
        })
    }
}
