//! TrackVis `.trk` streamline files
//!
//! Version 2 layout: a 1000-byte little-endian header followed by one record
//! per streamline (`i32` point count, then `x y z [scalars]` as `f32` per
//! point, then per-streamline properties). Points are stored in voxel-mm
//! with the voxel-corner origin; `vox_to_ras` maps voxels to world space.

use std::io::Write;
use std::path::Path;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::space::{Affine, Origin, Space};
use crate::tractogram::{SpatialReference, StatefulTractogram};
use crate::tracking::Streamline;

const HEADER_SIZE: usize = 1000;
const MAGIC: &[u8; 6] = b"TRACK\0";

const OFF_DIM: usize = 6;
const OFF_VOXEL_SIZE: usize = 12;
const OFF_N_SCALARS: usize = 36;
const OFF_N_PROPERTIES: usize = 238;
const OFF_VOX_TO_RAS: usize = 440;
const OFF_VOXEL_ORDER: usize = 948;
const OFF_N_COUNT: usize = 988;
const OFF_VERSION: usize = 992;
const OFF_HDR_SIZE: usize = 996;

fn read_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Build the 1000-byte header for a reference geometry
fn encode_header(reference: &SpatialReference, n_streamlines: usize) -> Result<[u8; HEADER_SIZE]> {
    let (nx, ny, nz) = reference.dims;
    for d in [nx, ny, nz] {
        if d > i16::MAX as usize {
            return Err(Error::invalid(format!("dimension {} is not storable in a TrackVis header", d)));
        }
    }
    let n_count = i32::try_from(n_streamlines)
        .map_err(|_| Error::invalid(format!("{} streamlines exceed the TrackVis count field", n_streamlines)))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..6].copy_from_slice(MAGIC);

    for (i, &d) in [nx, ny, nz].iter().enumerate() {
        let offset = OFF_DIM + i * 2;
        header[offset..offset + 2].copy_from_slice(&(d as i16).to_le_bytes());
    }
    for (i, &v) in reference.voxel_sizes.iter().enumerate() {
        let offset = OFF_VOXEL_SIZE + i * 4;
        header[offset..offset + 4].copy_from_slice(&(v as f32).to_le_bytes());
    }

    let m = reference.affine.as_array();
    for (i, &v) in m.iter().enumerate() {
        let offset = OFF_VOX_TO_RAS + i * 4;
        header[offset..offset + 4].copy_from_slice(&(v as f32).to_le_bytes());
    }

    let codes = reference.affine.axcodes();
    for (i, c) in codes.iter().enumerate() {
        header[OFF_VOXEL_ORDER + i] = *c as u8;
    }

    header[OFF_N_COUNT..OFF_N_COUNT + 4].copy_from_slice(&n_count.to_le_bytes());
    header[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&2i32.to_le_bytes());
    header[OFF_HDR_SIZE..OFF_HDR_SIZE + 4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    Ok(header)
}

/// Encode a tractogram as `.trk` bytes
pub fn encode_trk(sft: &StatefulTractogram) -> Result<Vec<u8>> {
    let mut trk = sft.clone();
    trk.to_origin(Origin::TrackVis);
    trk.to_voxmm();

    let header = encode_header(sft.reference(), trk.len())?;
    let n_points: usize = trk.streamlines.iter().map(Vec::len).sum();

    let mut buffer = Vec::with_capacity(HEADER_SIZE + trk.len() * 4 + n_points * 12);
    buffer.write_all(&header)?;
    for line in &trk.streamlines {
        let count = i32::try_from(line.len())
            .map_err(|_| Error::invalid(format!("streamline of {} points is too long", line.len())))?;
        buffer.write_all(&count.to_le_bytes())?;
        for p in line {
            for &c in p {
                buffer.write_all(&(c as f32).to_le_bytes())?;
            }
        }
    }
    Ok(buffer)
}

/// Decode `.trk` bytes into a tractogram in RAS-mm
///
/// Per-point scalars and per-streamline properties are skipped.
pub fn decode_trk(bytes: &[u8]) -> Result<StatefulTractogram> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::Format(format!("TrackVis file is {} bytes, shorter than its header", bytes.len())));
    }
    if &bytes[0..5] != b"TRACK" {
        return Err(Error::Format("missing TRACK magic".into()));
    }
    let hdr_size = read_i32(bytes, OFF_HDR_SIZE);
    if hdr_size != HEADER_SIZE as i32 {
        if i32::from_be_bytes(hdr_size.to_le_bytes()) == HEADER_SIZE as i32 {
            return Err(Error::Format("big-endian TrackVis files are not supported".into()));
        }
        return Err(Error::Format(format!("unexpected TrackVis header size {}", hdr_size)));
    }
    let version = read_i32(bytes, OFF_VERSION);
    if !(1..=2).contains(&version) {
        return Err(Error::Format(format!("unsupported TrackVis version {}", version)));
    }

    let dims = (
        read_i16(bytes, OFF_DIM).max(0) as usize,
        read_i16(bytes, OFF_DIM + 2).max(0) as usize,
        read_i16(bytes, OFF_DIM + 4).max(0) as usize,
    );
    let voxel_size = [
        read_f32(bytes, OFF_VOXEL_SIZE) as f64,
        read_f32(bytes, OFF_VOXEL_SIZE + 4) as f64,
        read_f32(bytes, OFF_VOXEL_SIZE + 8) as f64,
    ];

    let mut m = [0.0f64; 16];
    for (i, v) in m.iter_mut().enumerate() {
        *v = read_f32(bytes, OFF_VOX_TO_RAS + i * 4) as f64;
    }
    // Version 1 files and writers that leave vox_to_ras blank
    let affine = if version == 1 || m[15] == 0.0 {
        Affine::from_scaling(voxel_size)
    } else {
        Affine::new(m)
    };

    let n_scalars = read_i16(bytes, OFF_N_SCALARS).max(0) as usize;
    let n_properties = read_i16(bytes, OFF_N_PROPERTIES).max(0) as usize;
    let n_count = read_i32(bytes, OFF_N_COUNT).max(0) as usize;

    let stride = (3 + n_scalars) * 4;
    let mut streamlines: Vec<Streamline> = Vec::with_capacity(n_count);
    let mut pos = HEADER_SIZE;
    while pos < bytes.len() && (n_count == 0 || streamlines.len() < n_count) {
        if pos + 4 > bytes.len() {
            return Err(Error::Format(format!("truncated record at byte {}", pos)));
        }
        let n_points = read_i32(bytes, pos);
        if n_points < 0 {
            return Err(Error::Format(format!("negative point count at byte {}", pos)));
        }
        pos += 4;

        let n_points = n_points as usize;
        let end = pos + n_points * stride + n_properties * 4;
        if end > bytes.len() {
            return Err(Error::Format(format!(
                "streamline {} needs {} bytes past the end of the file",
                streamlines.len(),
                end - bytes.len()
            )));
        }
        let line = (0..n_points)
            .map(|i| {
                let o = pos + i * stride;
                [read_f32(bytes, o) as f64, read_f32(bytes, o + 4) as f64, read_f32(bytes, o + 8) as f64]
            })
            .collect();
        streamlines.push(line);
        pos = end;
    }
    if n_count > 0 && streamlines.len() < n_count {
        return Err(Error::Format(format!(
            "header declares {} streamlines, file holds {}",
            n_count,
            streamlines.len()
        )));
    }

    let reference = SpatialReference { affine, dims, voxel_sizes: voxel_size };
    let mut sft = StatefulTractogram::with_origin(streamlines, reference, Space::VoxMm, Origin::TrackVis)?;
    sft.to_origin(Origin::Nifti);
    sft.to_rasmm();
    Ok(sft)
}

/// Write a tractogram to a `.trk` file
pub fn save_trk(path: &Path, sft: &StatefulTractogram) -> Result<()> {
    let bytes = encode_trk(sft)?;
    std::fs::write(path, &bytes)?;
    info!("Saved {} streamlines to {}", sft.len(), path.display());
    Ok(())
}

/// Read a `.trk` file into a tractogram in RAS-mm
pub fn load_trk(path: &Path) -> Result<StatefulTractogram> {
    if !path.exists() {
        return Err(Error::FileNotFound { path: path.to_path_buf() });
    }
    let bytes = std::fs::read(path)?;
    let sft = decode_trk(&bytes)?;
    debug!("Loaded {} streamlines from {}", sft.len(), path.display());
    Ok(sft)
}
