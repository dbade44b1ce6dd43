//! Spatial reference: voxel-to-world affines and coordinate spaces
//!
//! Affines are stored as 4x4 row-major arrays, the same layout the NIfTI
//! `srow_x/srow_y/srow_z` fields use. World space is RAS+ millimetres.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coordinate space a set of points is expressed in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    /// Voxel indices
    Vox,
    /// Voxel indices scaled by voxel size
    VoxMm,
    /// Scanner world coordinates (RAS+, mm)
    RasMm,
}

/// Where integer voxel coordinates sit within a voxel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Integer coordinates at voxel centers
    Nifti,
    /// Integer coordinates at voxel corners
    TrackVis,
}

/// 4x4 voxel-to-world transform
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    m: [f64; 16],
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn new(m: [f64; 16]) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self::from_scaling([1.0, 1.0, 1.0])
    }

    /// Diagonal affine with the given voxel sizes and no translation
    pub fn from_scaling(voxel_size: [f64; 3]) -> Self {
        Self::new([
            voxel_size[0], 0.0, 0.0, 0.0,
            0.0, voxel_size[1], 0.0, 0.0,
            0.0, 0.0, voxel_size[2], 0.0,
            0.0, 0.0, 0.0, 1.0,
        ])
    }

    pub fn as_array(&self) -> &[f64; 16] {
        &self.m
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.m[row * 4 + col]
    }

    /// Transform a point (homogeneous w = 1)
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.m;
        [
            m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3],
            m[4] * p[0] + m[5] * p[1] + m[6] * p[2] + m[7],
            m[8] * p[0] + m[9] * p[1] + m[10] * p[2] + m[11],
        ]
    }

    /// Invert the affine. Fails when the linear part is singular.
    pub fn inverse(&self) -> Result<Affine> {
        let a = |r: usize, c: usize| self.get(r, c);

        let c00 = a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1);
        let c01 = a(1, 2) * a(2, 0) - a(1, 0) * a(2, 2);
        let c02 = a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0);
        let det = a(0, 0) * c00 + a(0, 1) * c01 + a(0, 2) * c02;

        if det.abs() < 1e-12 {
            return Err(Error::invalid(format!("affine is singular (det={det:e})")));
        }
        let inv_det = 1.0 / det;

        let mut inv = [[0.0f64; 3]; 3];
        inv[0][0] = c00 * inv_det;
        inv[1][0] = c01 * inv_det;
        inv[2][0] = c02 * inv_det;
        inv[0][1] = (a(0, 2) * a(2, 1) - a(0, 1) * a(2, 2)) * inv_det;
        inv[1][1] = (a(0, 0) * a(2, 2) - a(0, 2) * a(2, 0)) * inv_det;
        inv[2][1] = (a(0, 1) * a(2, 0) - a(0, 0) * a(2, 1)) * inv_det;
        inv[0][2] = (a(0, 1) * a(1, 2) - a(0, 2) * a(1, 1)) * inv_det;
        inv[1][2] = (a(0, 2) * a(1, 0) - a(0, 0) * a(1, 2)) * inv_det;
        inv[2][2] = (a(0, 0) * a(1, 1) - a(0, 1) * a(1, 0)) * inv_det;

        let t = [a(0, 3), a(1, 3), a(2, 3)];
        let mut out = [0.0f64; 16];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 4 + c] = inv[r][c];
            }
            out[r * 4 + 3] = -(inv[r][0] * t[0] + inv[r][1] * t[1] + inv[r][2] * t[2]);
        }
        out[15] = 1.0;

        Ok(Affine::new(out))
    }

    /// Voxel sizes as the column norms of the linear part
    pub fn voxel_sizes(&self) -> [f64; 3] {
        let mut sizes = [0.0; 3];
        for (c, size) in sizes.iter_mut().enumerate() {
            *size = (0..3).map(|r| self.get(r, c).powi(2)).sum::<f64>().sqrt();
        }
        sizes
    }

    /// Orientation codes of the voxel axes, e.g. `['R', 'A', 'S']`
    ///
    /// Each voxel axis is assigned the world axis it is most aligned with.
    pub fn axcodes(&self) -> [char; 3] {
        const POS: [char; 3] = ['R', 'A', 'S'];
        const NEG: [char; 3] = ['L', 'P', 'I'];

        let mut codes = ['R', 'A', 'S'];
        let mut used = [false; 3];
        for (c, code) in codes.iter_mut().enumerate() {
            let mut best_row = 0;
            let mut best_val = -1.0;
            for (r, &taken) in used.iter().enumerate() {
                let v = self.get(r, c).abs();
                if !taken && v > best_val {
                    best_val = v;
                    best_row = r;
                }
            }
            used[best_row] = true;
            *code = if self.get(best_row, c) >= 0.0 { POS[best_row] } else { NEG[best_row] };
        }
        codes
    }
}
