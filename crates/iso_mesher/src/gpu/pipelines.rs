use std::collections::HashMap;

use crate::error::{ExtractError, Result};

use super::shaders::{with_params, COMPACT_WGSL, GENERATE_WGSL, REDUCE_WGSL};

pub struct GpuPipelines {
    pub reduce_pipeline: wgpu::ComputePipeline,
    pub reduce_bind_group_layout: wgpu::BindGroupLayout,
    pub scan_pipeline: wgpu::ComputePipeline,
    pub scatter_pipeline: wgpu::ComputePipeline,
    pub compact_bind_group_layout: wgpu::BindGroupLayout,
    pub generate_pipeline: wgpu::ComputePipeline,
    pub generate_bind_group_layout: wgpu::BindGroupLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub async fn create_pipelines(device: &wgpu::Device, workgroup_size: u32) -> Result<GpuPipelines> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let reduce_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("iso_mesher.reduce.wgsl"),
        source: wgpu::ShaderSource::Wgsl(with_params(REDUCE_WGSL).into()),
    });
    let compact_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("iso_mesher.compact.wgsl"),
        source: wgpu::ShaderSource::Wgsl(with_params(COMPACT_WGSL).into()),
    });
    let generate_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("iso_mesher.generate.wgsl"),
        source: wgpu::ShaderSource::Wgsl(with_params(GENERATE_WGSL).into()),
    });

    let reduce_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("iso_mesher.reduce_bind_group_layout"),
        entries: &[storage_entry(0, true), storage_entry(1, false), uniform_entry(2)],
    });
    let compact_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("iso_mesher.compact_bind_group_layout"),
        entries: &[
            storage_entry(0, true),
            storage_entry(1, false),
            storage_entry(2, false),
            storage_entry(3, false),
            uniform_entry(4),
        ],
    });
    let generate_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("iso_mesher.generate_bind_group_layout"),
        entries: &[
            storage_entry(0, true),
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, true),
            storage_entry(4, true),
            storage_entry(5, false),
            storage_entry(6, false),
            uniform_entry(7),
        ],
    });

    let reduce_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("iso_mesher.reduce_pipeline_layout"),
        bind_group_layouts: &[&reduce_bind_group_layout],
        push_constant_ranges: &[],
    });
    let compact_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("iso_mesher.compact_pipeline_layout"),
        bind_group_layouts: &[&compact_bind_group_layout],
        push_constant_ranges: &[],
    });
    let generate_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("iso_mesher.generate_pipeline_layout"),
        bind_group_layouts: &[&generate_bind_group_layout],
        push_constant_ranges: &[],
    });

    let mut constants = HashMap::new();
    constants.insert("WORKGROUP_SIZE".to_string(), workgroup_size as f64);
    let compilation_options = || wgpu::PipelineCompilationOptions {
        constants: &constants,
        ..Default::default()
    };

    let reduce_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("iso_mesher.reduce_pipeline"),
        layout: Some(&reduce_pipeline_layout),
        module: &reduce_shader,
        entry_point: "main",
        compilation_options: compilation_options(),
        cache: None,
    });
    let scan_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("iso_mesher.scan_pipeline"),
        layout: Some(&compact_pipeline_layout),
        module: &compact_shader,
        entry_point: "scan_local",
        compilation_options: compilation_options(),
        cache: None,
    });
    let scatter_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("iso_mesher.scatter_pipeline"),
        layout: Some(&compact_pipeline_layout),
        module: &compact_shader,
        entry_point: "scatter",
        compilation_options: compilation_options(),
        cache: None,
    });
    let generate_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("iso_mesher.generate_pipeline"),
        layout: Some(&generate_pipeline_layout),
        module: &generate_shader,
        entry_point: "main",
        compilation_options: compilation_options(),
        cache: None,
    });

    if let Some(err) = device.pop_error_scope().await {
        return Err(ExtractError::Validation(format!("pipeline creation: {err}")));
    }

    Ok(GpuPipelines {
        reduce_pipeline,
        reduce_bind_group_layout,
        scan_pipeline,
        scatter_pipeline,
        compact_bind_group_layout,
        generate_pipeline,
        generate_bind_group_layout,
    })
}
