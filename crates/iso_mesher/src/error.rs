//! Error types for isosurface extraction.

use thiserror::Error;

/// Everything that can abort an extraction.
///
/// Degenerate geometry and empty results are not errors: a zero-length edge
/// interpolates to its midpoint and a volume without a crossing yields an
/// empty [`TriangleBuffer`](crate::core::TriangleBuffer).
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The scalar grid or its dimensions are unusable.
    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    /// Extraction options or GPU configuration are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No wgpu adapter could be found.
    #[error("no GPU adapter available")]
    NoAdapter,

    /// The adapter refused to create a device.
    #[error("failed to request device: {0}")]
    Device(String),

    /// A buffer would not fit on the device, or the device ran out of memory.
    #[error("{label}: {bytes} bytes exceeds device limit of {limit} bytes")]
    ResourceExhausted { label: String, bytes: u64, limit: u64 },

    /// Mapping a readback buffer failed.
    #[error("buffer map failed: {0}")]
    BufferMap(String),

    /// wgpu reported a validation error for a pipeline or pass.
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error while reading or writing a volume file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
