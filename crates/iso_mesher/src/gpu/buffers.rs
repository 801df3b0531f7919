use bytemuck::Pod;

use crate::error::{ExtractError, Result};

/// Maps a `MAP_READ` buffer and copies its contents out.
pub async fn map_buffer<T: Pod>(buffer: &wgpu::Buffer, device: &wgpu::Device) -> Result<Vec<T>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .await
        .map_err(|_| ExtractError::BufferMap("map callback dropped".into()))?
        .map_err(|e| ExtractError::BufferMap(e.to_string()))?;
    let data = slice.get_mapped_range();
    let result = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    buffer.unmap();
    Ok(result)
}

pub fn readback_buffer(device: &wgpu::Device, label: &str, bytes: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}
