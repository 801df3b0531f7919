//! Bounds-safe random access into a [`ScalarVolume`].

use glam::Vec3;

use crate::core::ScalarVolume;

/// What a lookup outside the grid returns.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BoundaryMode {
    /// Read the nearest in-range voxel.
    #[default]
    Clamp,
    /// Read a fixed sentinel value.
    Constant(f32),
}

/// Read-only sampler shared by all CPU stages.
///
/// It borrows the volume, so any number of worker threads can sample
/// concurrently without synchronization.
#[derive(Debug, Clone, Copy)]
pub struct VolumeSampler<'a> {
    volume: &'a ScalarVolume,
    boundary: BoundaryMode,
}

impl<'a> VolumeSampler<'a> {
    pub fn new(volume: &'a ScalarVolume, boundary: BoundaryMode) -> Self {
        Self { volume, boundary }
    }

    pub fn volume(&self) -> &'a ScalarVolume {
        self.volume
    }

    pub fn dims(&self) -> [u32; 3] {
        self.volume.dims()
    }

    pub fn boundary(&self) -> BoundaryMode {
        self.boundary
    }

    /// Value at an integer voxel coordinate. Never panics.
    #[inline]
    pub fn sample(&self, x: i64, y: i64, z: i64) -> f32 {
        let [nx, ny, nz] = self.dims().map(|d| d as i64);
        let inside = (0..nx).contains(&x) && (0..ny).contains(&y) && (0..nz).contains(&z);
        if inside {
            return self.volume.get(x as u32, y as u32, z as u32);
        }
        match self.boundary {
            BoundaryMode::Clamp => self.volume.get(
                x.clamp(0, nx - 1) as u32,
                y.clamp(0, ny - 1) as u32,
                z.clamp(0, nz - 1) as u32,
            ),
            BoundaryMode::Constant(value) => value,
        }
    }

    /// Fast path for coordinates known to be in range.
    #[inline]
    pub fn sample_in_range(&self, x: u32, y: u32, z: u32) -> f32 {
        self.volume.get(x, y, z)
    }

    /// Trilinear lookup at normalized coordinates; `[0, 1]` spans the first
    /// to the last voxel on each axis.
    pub fn sample_normalized(&self, uvw: Vec3) -> f32 {
        let dims = self.dims();
        let extent = Vec3::new(
            (dims[0] - 1) as f32,
            (dims[1] - 1) as f32,
            (dims[2] - 1) as f32,
        );
        let p = uvw * extent;
        let base = p.floor();
        let f = p - base;
        let (x0, y0, z0) = (base.x as i64, base.y as i64, base.z as i64);

        let c000 = self.sample(x0, y0, z0);
        let c100 = self.sample(x0 + 1, y0, z0);
        let c010 = self.sample(x0, y0 + 1, z0);
        let c110 = self.sample(x0 + 1, y0 + 1, z0);
        let c001 = self.sample(x0, y0, z0 + 1);
        let c101 = self.sample(x0 + 1, y0, z0 + 1);
        let c011 = self.sample(x0, y0 + 1, z0 + 1);
        let c111 = self.sample(x0 + 1, y0 + 1, z0 + 1);

        let x00 = c000 + (c100 - c000) * f.x;
        let x10 = c010 + (c110 - c010) * f.x;
        let x01 = c001 + (c101 - c001) * f.x;
        let x11 = c011 + (c111 - c011) * f.x;
        let y0v = x00 + (x10 - x00) * f.y;
        let y1v = x01 + (x11 - x01) * f.y;
        y0v + (y1v - y0v) * f.z
    }
}
