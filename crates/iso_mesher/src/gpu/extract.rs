use std::path::Path;

use crate::core::{
    estimate_vertex_capacity, BlockLayout, BlockRange, DispatchStats, ExtractOpts,
    ExtractionOutput, ScalarVolume, TriangleBuffer,
};
use crate::error::{ExtractError, Result};
use crate::volume_io::load_volume;

use super::compact::CompactedBlocks;
use super::generate::GpuTriangles;
use super::{map_buffer, readback_buffer, GpuExtractor, GpuVolumeSampler, Params};

impl GpuExtractor {
    /// Loads a volume file and extracts the `threshold` isosurface on the GPU
    /// with default options.
    pub async fn extract_surface<P: AsRef<Path>>(
        &self,
        path: P,
        threshold: f32,
    ) -> Result<TriangleBuffer> {
        let volume = load_volume(path)?;
        let output = self
            .extract_volume(&volume, threshold, &ExtractOpts::default())
            .await?;
        Ok(output.triangles)
    }

    /// Runs reduce, compact and generate on the device. Each stage is
    /// submitted and read back before the next one is recorded.
    ///
    /// `opts.reduce_lanes` does not apply here; every stage uses the
    /// extractor's workgroup size.
    ///
    /// On volumes containing NaN the block ranges may differ from the CPU
    /// backend: the CPU reduction drops NaN samples, while WGSL `min`/`max`
    /// on NaN is implementation-defined.
    pub async fn extract_volume(
        &self,
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
        let params = Params::new(spec, &layout, threshold);
        let sampler = GpuVolumeSampler::upload(self, volume).await?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let staged = self.run_stages(&sampler, &layout, &params, opts).await;
        if let Some(err) = self.device.pop_error_scope().await {
            return Err(ExtractError::Validation(format!("extraction: {err}")));
        }
        let (block_ranges, blocks, generated) = staged?;

        let cells_processed: u64 = blocks
            .active
            .indices
            .iter()
            .map(|&b| layout.valid_cells(b, spec.dims))
            .sum();
        let stats = DispatchStats {
            blocks_total: layout.num_blocks_total(),
            blocks_active: blocks.active.count(),
            cells_processed,
            vertices: generated.triangles.vertex_count() as u32,
            regrown: generated.regrown,
        };
        log::info!(
            "GPU extracted {} triangles from {}/{} active blocks{}",
            generated.triangles.triangle_count(),
            stats.blocks_active,
            stats.blocks_total,
            if stats.regrown { " (output regrown)" } else { "" }
        );

        Ok(ExtractionOutput {
            block_ranges,
            active: blocks.active,
            triangles: generated.triangles,
            stats,
        })
    }

    async fn run_stages(
        &self,
        sampler: &GpuVolumeSampler,
        layout: &BlockLayout,
        params: &Params,
        opts: &ExtractOpts,
    ) -> Result<(Vec<BlockRange>, CompactedBlocks, GpuTriangles)> {
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("iso_mesher.reduce.encoder"),
        });
        let ranges_buf = self.encode_reduce(&mut encoder, sampler, params)?;
        let range_bytes = layout.num_blocks_total() as u64 * 8;
        let read_ranges = readback_buffer(&self.device, "iso_mesher.reduce.read_ranges", range_bytes);
        encoder.copy_buffer_to_buffer(&ranges_buf, 0, &read_ranges, 0, range_bytes);
        self.queue.submit([encoder.finish()]);
        let block_ranges: Vec<BlockRange> = map_buffer(&read_ranges, &self.device).await?;
        log::debug!("reduced {} blocks on the GPU", block_ranges.len());

        let blocks = self.compact_blocks(&ranges_buf, params).await?;
        log::debug!(
            "{} of {} blocks straddle threshold {}",
            blocks.active.count(),
            block_ranges.len(),
            params.threshold
        );

        let capacity = opts
            .vertex_capacity
            .unwrap_or_else(|| estimate_vertex_capacity(layout, blocks.active.count()));
        let generated = self
            .generate_triangles(sampler, &blocks, params, capacity)
            .await?;
        Ok((block_ranges, blocks, generated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VolumeSpec;
    use crate::gpu::GpuExtractorConfig;
    use crate::pipeline::extract_volume;
    use futures::executor::block_on;
    use glam::Vec3;

    fn sphere() -> ScalarVolume {
        let center = Vec3::new(20.3, 19.6, 21.1);
        ScalarVolume::from_fn(VolumeSpec::new([42, 40, 44]), |x, y, z| {
            (Vec3::new(x as f32, y as f32, z as f32) - center).length()
        })
        .expect("volume")
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn gpu_matches_cpu() {
        let gpu = block_on(GpuExtractor::new(GpuExtractorConfig::default())).expect("gpu");
        let vol = sphere();
        let opts = ExtractOpts::default();

        let cpu = extract_volume(&vol, 12.0, &opts).expect("cpu");
        let dev = block_on(gpu.extract_volume(&vol, 12.0, &opts)).expect("gpu extract");

        assert_eq!(dev.block_ranges, cpu.block_ranges);
        assert_eq!(dev.active, cpu.active);
        assert_eq!(dev.stats.cells_processed, cpu.stats.cells_processed);
        assert_eq!(dev.triangles.triangle_count(), cpu.triangles.triangle_count());
        let (a, b) = (dev.triangles.surface_area(), cpu.triangles.surface_area());
        assert!(((a - b) / b).abs() < 1e-3, "area {a} vs {b}");
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn gpu_regrows_undersized_output() {
        let gpu = block_on(GpuExtractor::new(GpuExtractorConfig::default())).expect("gpu");
        let vol = sphere();
        let opts = ExtractOpts {
            vertex_capacity: Some(3),
            ..ExtractOpts::default()
        };
        let out = block_on(gpu.extract_volume(&vol, 12.0, &opts)).expect("gpu extract");
        let cpu = extract_volume(&vol, 12.0, &ExtractOpts::default()).expect("cpu");
        assert!(out.stats.regrown);
        assert_eq!(out.triangles.triangle_count(), cpu.triangles.triangle_count());
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn gpu_empty_when_nothing_straddles() {
        let gpu = block_on(GpuExtractor::new(GpuExtractorConfig::default())).expect("gpu");
        let out = block_on(gpu.extract_volume(&sphere(), 1000.0, &ExtractOpts::default()))
            .expect("gpu extract");
        assert!(out.active.is_empty());
        assert!(out.triangles.is_empty());
    }
}
