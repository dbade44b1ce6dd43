//! Common test utilities for dmri-core integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use dmri_core::dti::{tensor_signal, TensorParams};
use dmri_core::gradients::{write_bvals_bvecs, GradientTable, DEFAULT_B0_THRESHOLD};
use dmri_core::nifti_io::save_nifti_to_file;
use dmri_core::space::Affine;
use dmri_core::utils::{idx3d, unravel3d};

pub const AXES: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Scratch directory unique to this process and test
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dmri_it_{}_{}", std::process::id(), name));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Binary ball around `center` (voxel coordinates)
pub fn sphere_mask(dims: (usize, usize, usize), center: [f64; 3], radius: f64) -> Vec<u8> {
    let (nx, ny, nz) = dims;
    (0..nx * ny * nz)
        .map(|idx| {
            let (i, j, k) = unravel3d(idx, nx, ny);
            let d2 = (i as f64 - center[0]).powi(2) + (j as f64 - center[1]).powi(2) + (k as f64 - center[2]).powi(2);
            u8::from(d2 <= radius * radius)
        })
        .collect()
}

/// Two b0s plus 12 well-spread directions at b = 1000
pub fn gradient_table() -> GradientTable {
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let t = 1.0 / 3.0f64.sqrt();
    let dirs = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0],
        [s, s, 0.0], [s, -s, 0.0], [s, 0.0, s],
        [s, 0.0, -s], [0.0, s, s], [0.0, s, -s],
        [0.0, 0.0, 0.0],
        [t, t, t], [t, -t, t], [-t, t, t],
    ];
    let bvals = dirs
        .iter()
        .map(|d| if d == &[0.0, 0.0, 0.0] { 0.0 } else { 1000.0 })
        .collect();
    GradientTable::new(bvals, dirs, DEFAULT_B0_THRESHOLD).unwrap()
}

/// Tensor along `x` with FA = 0.8 (`λ∥ / λ⊥ ≈ 5.692`)
pub fn fa08_tensor() -> TensorParams {
    let perp = 0.3e-3;
    let par = perp * (2.0 + (4.0f64 + 0.4032).sqrt()) / 0.72;
    TensorParams::from_eigen([par, perp, perp], AXES)
}

/// Synthetic single-fiber phantom
pub struct Phantom {
    /// 4D series, volume-major
    pub data: Vec<f64>,
    pub dims: (usize, usize, usize),
    pub gtab: GradientTable,
    /// Voxels filled with tissue
    pub tissue: Vec<u8>,
    pub affine: Affine,
    pub s0: f64,
}

impl Phantom {
    /// A ball of x-oriented fibers in an empty background
    pub fn ball(n: usize, radius: f64) -> Self {
        let dims = (n, n, n);
        let c = (n as f64 - 1.0) / 2.0;
        let tissue = sphere_mask(dims, [c, c, c], radius);
        let gtab = gradient_table();
        let tensor = fa08_tensor();
        let s0 = 1000.0;

        let nvox = n * n * n;
        let mut data = vec![0.0; nvox * gtab.len()];
        for (idx, &m) in tissue.iter().enumerate() {
            if m == 0 {
                continue;
            }
            for t in 0..gtab.len() {
                data[t * nvox + idx] = tensor_signal(&tensor, gtab.bvals[t], gtab.bvecs[t], s0);
            }
        }

        let affine = Affine::new([
            2.0, 0.0, 0.0, -(n as f64),
            0.0, 2.0, 0.0, -(n as f64),
            0.0, 0.0, 2.0, -(n as f64),
            0.0, 0.0, 0.0, 1.0,
        ]);
        Phantom { data, dims, gtab, tissue, affine, s0 }
    }

    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn voxel(&self, i: usize, j: usize, k: usize) -> usize {
        idx3d(i, j, k, self.dims.0, self.dims.1)
    }

    /// Write as `sub-<subject>/dwi/sub-<subject>_dwi.{nii.gz,bval,bvec}` under `root`
    pub fn write_bids(&self, root: &Path, subject: &str) -> PathBuf {
        let dwi_dir = root.join(format!("sub-{}", subject)).join("dwi");
        std::fs::create_dir_all(&dwi_dir).unwrap();
        let stem = format!("sub-{}_dwi", subject);

        let nii = dwi_dir.join(format!("{}.nii.gz", stem));
        save_nifti_to_file(&nii, &self.data, self.dims, self.gtab.len(), &self.affine).unwrap();
        write_bvals_bvecs(
            &self.gtab,
            &dwi_dir.join(format!("{}.bval", stem)),
            &dwi_dir.join(format!("{}.bvec", stem)),
        )
        .unwrap();
        nii
    }
}

/// Fraction of `a`'s set voxels also set in `b`
pub fn overlap(a: &[u8], b: &[u8]) -> f64 {
    let set = a.iter().filter(|&&v| v != 0).count();
    if set == 0 {
        return 0.0;
    }
    let both = a.iter().zip(b).filter(|(&x, &y)| x != 0 && y != 0).count();
    both as f64 / set as f64
}
