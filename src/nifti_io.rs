//! NIfTI-1 file I/O
//!
//! Loads 3D and 4D images (`.nii` and `.nii.gz`, gzip is auto-detected) into
//! flat Fortran-ordered buffers and writes float32 images with an sform.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{Error, Result};
use crate::space::Affine;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;

/// Image loaded from a NIfTI file
#[derive(Clone, Debug)]
pub struct NiftiData {
    /// Voxel values, index = x + y*nx + z*nx*ny + t*nx*ny*nz
    pub data: Vec<f64>,
    /// Spatial dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Number of volumes (1 for 3D images)
    pub nt: usize,
    /// Voxel sizes in mm, from pixdim
    pub voxel_size: (f64, f64, f64),
    /// Voxel to RAS+ mm transform
    pub affine: Affine,
    pub scl_slope: f64,
    pub scl_inter: f64,
}

impl NiftiData {
    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Slice of volume `t`
    pub fn volume(&self, t: usize) -> &[f64] {
        let n = self.n_voxels();
        &self.data[t * n..(t + 1) * n]
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Summarize the raw header fields for error messages
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < HEADER_SIZE {
        return format!("File too small ({} bytes, need at least {})", bytes.len(), HEADER_SIZE);
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Load a NIfTI image from bytes
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData> {
    let raw: Vec<u8>;
    let plain: &[u8] = if is_gzip(bytes) {
        let mut decoded = Vec::new();
        GzDecoder::new(Cursor::new(bytes))
            .read_to_end(&mut decoded)
            .map_err(|e| Error::Nifti(format!("Failed to decompress gzipped NIfTI: {}", e)))?;
        raw = decoded;
        &raw
    } else {
        bytes
    };

    let obj = InMemNiftiObject::from_reader(Cursor::new(plain))
        .map_err(|e| Error::Nifti(format!("Failed to read NIfTI: {} ({})", e, get_header_info(plain))))?;

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if !(3..=4).contains(&ndim) {
        return Err(Error::Nifti(format!("Expected a 3D or 4D image, got {}D", ndim)));
    }

    let voxel_size = (header.pixdim[1] as f64, header.pixdim[2] as f64, header.pixdim[3] as f64);
    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = get_affine(header);

    let array: Array<f64, IxDyn> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| Error::Nifti(format!("Failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    let (nx, ny, nz, nt) = match shape.as_slice() {
        [nx, ny, nz] => (*nx, *ny, *nz, 1),
        [nx, ny, nz, nt] => (*nx, *ny, *nz, *nt),
        other => return Err(Error::Nifti(format!("Unsupported array shape {:?}", other))),
    };

    // The reversed-axes view iterates x fastest, then y, z, t
    let data: Vec<f64> = array.t().iter().copied().collect();

    Ok(NiftiData {
        data,
        dims: (nx, ny, nz),
        nt,
        voxel_size,
        affine,
        scl_slope,
        scl_inter,
    })
}

/// Get affine transformation matrix from header
///
/// The sform wins when set, then the qform, then plain pixdim scaling.
fn get_affine(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        Affine::new([
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ])
    } else if header.qform_code > 0 {
        qform_affine(header)
    } else {
        // Without an sform or qform, fall back to voxel scaling
        Affine::from_scaling([
            header.pixdim[1] as f64,
            header.pixdim[2] as f64,
            header.pixdim[3] as f64,
        ])
    }
}

/// Affine from the quaternion, pixdim and qoffset fields
fn qform_affine(header: &NiftiHeader) -> Affine {
    let (mut b, mut c, mut d) = (header.quatern_b as f64, header.quatern_c as f64, header.quatern_d as f64);
    let sum = b * b + c * c + d * d;
    let a = if sum > 1.0 {
        // Rounding pushed the vector past unit length: a 180 degree rotation
        let norm = sum.sqrt();
        b /= norm;
        c /= norm;
        d /= norm;
        0.0
    } else {
        (1.0 - sum).sqrt()
    };

    let rot = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
    ];
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let scale = [header.pixdim[1] as f64, header.pixdim[2] as f64, qfac * header.pixdim[3] as f64];
    let offset = [header.quatern_x as f64, header.quatern_y as f64, header.quatern_z as f64];

    let mut m = [0.0; 16];
    for row in 0..3 {
        for col in 0..3 {
            m[row * 4 + col] = rot[row][col] * scale[col];
        }
        m[row * 4 + 3] = offset[row];
    }
    m[15] = 1.0;
    Affine::new(m)
}

/// Encode an image as uncompressed NIfTI-1 bytes (float32, sform_code = 1)
pub fn save_nifti(
    data: &[f64],
    dims: (usize, usize, usize),
    nt: usize,
    affine: &Affine,
) -> Result<Vec<u8>> {
    let (nx, ny, nz) = dims;
    let expected = nx * ny * nz * nt;
    if data.len() != expected {
        return Err(Error::shape_mismatch(
            format!("{} values ({}x{}x{}x{})", expected, nx, ny, nz, nt),
            data.len(),
        ));
    }
    for (axis, &d) in [nx, ny, nz, nt].iter().enumerate() {
        if d == 0 || d > i16::MAX as usize {
            return Err(Error::invalid(format!("dimension {} = {} is not storable in NIfTI-1", axis, d)));
        }
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let ndim: i16 = if nt > 1 { 4 } else { 3 };
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let vs = affine.voxel_sizes();
    let pixdim: [f32; 8] = [1.0, vs[0] as f32, vs[1] as f32, vs[2] as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    let m = affine.as_array();
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            header[offset..offset + 4].copy_from_slice(&(m[row * 4 + col] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    buffer.write_all(&header)?;
    // Empty extension block
    buffer.write_all(&[0u8; 4])?;
    for &val in data {
        buffer.write_all(&(val as f32).to_le_bytes())?;
    }

    Ok(buffer)
}

/// Encode an image as gzipped NIfTI-1 bytes (.nii.gz)
pub fn save_nifti_gz(
    data: &[f64],
    dims: (usize, usize, usize),
    nt: usize,
    affine: &Affine,
) -> Result<Vec<u8>> {
    let uncompressed = save_nifti(data, dims, nt, affine)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&uncompressed)?;
    Ok(encoder.finish()?)
}

/// Read a NIfTI file from disk
pub fn read_nifti_file(path: &Path) -> Result<NiftiData> {
    if !path.exists() {
        return Err(Error::FileNotFound { path: path.to_path_buf() });
    }
    let bytes = std::fs::read(path)?;
    load_nifti(&bytes)
}

/// Write an image to disk, gzip compressed if the path ends with `.nii.gz`
pub fn save_nifti_to_file(
    path: &Path,
    data: &[f64],
    dims: (usize, usize, usize),
    nt: usize,
    affine: &Affine,
) -> Result<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        save_nifti_gz(data, dims, nt, affine)?
    } else {
        save_nifti(data, dims, nt, affine)?
    };
    std::fs::write(path, &bytes)?;
    Ok(())
}
