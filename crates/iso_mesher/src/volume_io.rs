//! Reading and writing raw scalar volume files.
//!
//! Layout, little endian:
//! - Bytes 0-3: magic `"ISOV"`
//! - Bytes 4-15: `nx`, `ny`, `nz` (u32)
//! - Byte 16: sample format (0 = u8, 1 = u16, 2 = f32)
//! - Bytes 17-19: zero
//! - `nx * ny * nz` samples, x fastest
//!
//! Integer samples are widened to `f32` on load.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use crate::core::{ScalarVolume, VolumeSpec};
use crate::error::{ExtractError, Result};

pub const VOLUME_MAGIC: [u8; 4] = *b"ISOV";
pub const HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    U16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::U16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    fn code(self) -> u8 {
        match self {
            SampleFormat::U8 => 0,
            SampleFormat::U16 => 1,
            SampleFormat::F32 => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SampleFormat::U8),
            1 => Some(SampleFormat::U16),
            2 => Some(SampleFormat::F32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeHeader {
    pub dims: [u32; 3],
    pub format: SampleFormat,
}

impl VolumeHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&VOLUME_MAGIC);
        bytes[4..8].copy_from_slice(&self.dims[0].to_le_bytes());
        bytes[8..12].copy_from_slice(&self.dims[1].to_le_bytes());
        bytes[12..16].copy_from_slice(&self.dims[2].to_le_bytes());
        bytes[16] = self.format.code();
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[0..4] != VOLUME_MAGIC {
            return Err(ExtractError::InvalidVolume(format!(
                "bad magic {:?}",
                &bytes[0..4]
            )));
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let format = SampleFormat::from_code(bytes[16]).ok_or_else(|| {
            ExtractError::InvalidVolume(format!("unknown sample format {}", bytes[16]))
        })?;
        if bytes[17..20] != [0, 0, 0] {
            return Err(ExtractError::InvalidVolume("reserved header bytes are not zero".into()));
        }
        Ok(Self {
            dims: [word(4), word(8), word(12)],
            format,
        })
    }

    /// Payload length in bytes, or `None` if it does not fit in memory.
    pub fn payload_len(&self) -> Option<usize> {
        let voxels = (self.dims[0] as u64)
            .checked_mul(self.dims[1] as u64)?
            .checked_mul(self.dims[2] as u64)?;
        let bytes = voxels.checked_mul(self.format.bytes_per_sample() as u64)?;
        usize::try_from(bytes).ok()
    }
}

/// Loads a volume file from disk.
pub fn load_volume<P: AsRef<Path>>(path: P) -> Result<ScalarVolume> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let volume = read_volume(BufReader::new(file))?;
    log::debug!("loaded {:?} volume from {}", volume.dims(), path.display());
    Ok(volume)
}

pub fn read_volume<R: Read>(mut reader: R) -> Result<ScalarVolume> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    read_exact_or_truncated(&mut reader, &mut header_bytes, "header")?;
    let header = VolumeHeader::from_bytes(&header_bytes)?;

    let spec = VolumeSpec::new(header.dims);
    spec.validate()?;
    let len = header.payload_len().ok_or_else(|| {
        ExtractError::InvalidVolume(format!("dims {:?} are too large", header.dims))
    })?;

    let mut payload = vec![0u8; len];
    read_exact_or_truncated(&mut reader, &mut payload, "payload")?;

    let samples: Vec<f32> = match header.format {
        SampleFormat::U8 => payload.iter().map(|&b| b as f32).collect(),
        SampleFormat::U16 => payload
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as f32)
            .collect(),
        SampleFormat::F32 => payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };
    ScalarVolume::new(spec, samples)
}

/// Writes `volume` in `format`. Samples are rounded and saturated when
/// narrowed to an integer format.
pub fn write_volume<W: Write>(mut writer: W, volume: &ScalarVolume, format: SampleFormat) -> Result<()> {
    let header = VolumeHeader {
        dims: volume.dims(),
        format,
    };
    writer.write_all(&header.to_bytes())?;

    let mut payload = Vec::with_capacity(volume.samples().len() * format.bytes_per_sample());
    for &v in volume.samples() {
        match format {
            SampleFormat::U8 => payload.push(v.round() as u8),
            SampleFormat::U16 => payload.extend_from_slice(&(v.round() as u16).to_le_bytes()),
            SampleFormat::F32 => payload.extend_from_slice(&v.to_le_bytes()),
        }
    }
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => ExtractError::InvalidVolume(format!("truncated {what}")),
        _ => ExtractError::Io(err),
    })
}
