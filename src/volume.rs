//! Scalar volumes and sub-voxel sampling
//!
//! Volumes use Fortran (column-major) ordering to match NIfTI:
//! `index = x + y*nx + z*nx*ny`.

use crate::error::{Error, Result};
use crate::utils::idx3d;

/// A 3D scalar map (FA, MD, masks promoted to f64, ...)
#[derive(Clone, Debug)]
pub struct ScalarVolume {
    pub data: Vec<f64>,
    pub dims: (usize, usize, usize),
}

impl ScalarVolume {
    pub fn new(data: Vec<f64>, dims: (usize, usize, usize)) -> Result<Self> {
        let n = dims.0 * dims.1 * dims.2;
        if data.len() != n {
            return Err(Error::shape_mismatch(
                format!("{} voxels ({}x{}x{})", n, dims.0, dims.1, dims.2),
                format!("{} values", data.len()),
            ));
        }
        Ok(Self { data, dims })
    }

    pub fn from_mask(mask: &[u8], dims: (usize, usize, usize)) -> Result<Self> {
        Self::new(mask.iter().map(|&m| if m != 0 { 1.0 } else { 0.0 }).collect(), dims)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[idx3d(i, j, k, self.dims.0, self.dims.1)]
    }

    /// True if every coordinate lies within `[-0.5, dim - 0.5]`
    #[inline]
    pub fn contains(&self, p: [f64; 3]) -> bool {
        point_in_volume(p, self.dims)
    }

    /// Index of the voxel whose center is closest to `p`
    pub fn nearest_voxel(&self, p: [f64; 3]) -> Option<(usize, usize, usize)> {
        nearest_voxel(p, self.dims)
    }

    /// Trilinear interpolation at a voxel-space point
    ///
    /// Returns `None` outside the volume. Points in the half-voxel border
    /// are clamped to the edge voxels.
    pub fn interpolate(&self, p: [f64; 3]) -> Option<f64> {
        if !self.contains(p) {
            return None;
        }
        let (nx, ny, nz) = self.dims;

        let axis = |v: f64, n: usize| -> (usize, usize, f64) {
            let x = v.clamp(0.0, (n - 1) as f64);
            let i0 = x.floor() as usize;
            let i1 = (i0 + 1).min(n - 1);
            (i0, i1, x - i0 as f64)
        };
        let (i0, i1, tx) = axis(p[0], nx);
        let (j0, j1, ty) = axis(p[1], ny);
        let (k0, k1, tz) = axis(p[2], nz);

        let c00 = self.get(i0, j0, k0) * (1.0 - tx) + self.get(i1, j0, k0) * tx;
        let c10 = self.get(i0, j1, k0) * (1.0 - tx) + self.get(i1, j1, k0) * tx;
        let c01 = self.get(i0, j0, k1) * (1.0 - tx) + self.get(i1, j0, k1) * tx;
        let c11 = self.get(i0, j1, k1) * (1.0 - tx) + self.get(i1, j1, k1) * tx;

        let c0 = c00 * (1.0 - ty) + c10 * ty;
        let c1 = c01 * (1.0 - ty) + c11 * ty;

        Some(c0 * (1.0 - tz) + c1 * tz)
    }
}

/// True if every coordinate of the voxel-space point lies in `[-0.5, dim - 0.5]`
#[inline]
pub fn point_in_volume(p: [f64; 3], dims: (usize, usize, usize)) -> bool {
    let d = [dims.0, dims.1, dims.2];
    (0..3).all(|a| d[a] > 0 && p[a] >= -0.5 && p[a] <= d[a] as f64 - 0.5)
}

/// Nearest voxel index for a voxel-space point, `None` outside the volume
pub fn nearest_voxel(p: [f64; 3], dims: (usize, usize, usize)) -> Option<(usize, usize, usize)> {
    if !point_in_volume(p, dims) {
        return None;
    }
    let round = |v: f64, n: usize| ((v + 0.5).floor().max(0.0) as usize).min(n - 1);
    Some((round(p[0], dims.0), round(p[1], dims.1), round(p[2], dims.2)))
}
