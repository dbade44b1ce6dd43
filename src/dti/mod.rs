//! Diffusion tensor imaging
//!
//! - `eigen`: 3x3 symmetric eigen-decomposition
//! - `fit`: log-linear tensor fitting (OLS / WLS)
//! - `metrics`: FA, MD, AD, RD, color FA and non-finite sanitization

pub mod eigen;
pub mod fit;
pub mod metrics;

pub use eigen::{eigh_symmetric, Eigen3};
pub use fit::{FitMethod, TensorFit, TensorModel, TensorModelParams};
pub use metrics::*;

/// One voxel's tensor as its eigen-decomposition
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TensorParams {
    /// Eigenvalues, descending, clamped at zero
    pub evals: [f64; 3],
    /// `evecs[i]` is the unit eigenvector of `evals[i]`
    pub evecs: [[f64; 3]; 3],
}

impl TensorParams {
    /// The zero tensor used for background and failed fits
    pub fn zero() -> Self {
        Self { evals: [0.0; 3], evecs: [[0.0; 3]; 3] }
    }

    /// Decompose from the six unique elements `[Dxx, Dxy, Dyy, Dxz, Dyz, Dzz]`
    pub fn from_lower_triangular(d: [f64; 6]) -> Self {
        let eig = eigh_symmetric([
            [d[0], d[1], d[3]],
            [d[1], d[2], d[4]],
            [d[3], d[4], d[5]],
        ]);
        let mut evals = eig.values;
        for v in evals.iter_mut() {
            *v = v.max(0.0);
        }
        Self { evals, evecs: eig.vectors }
    }

    /// Build from eigenvalues and (row) eigenvectors
    pub fn from_eigen(evals: [f64; 3], evecs: [[f64; 3]; 3]) -> Self {
        Self { evals, evecs }
    }

    /// Full 3x3 tensor `D = sum_k lambda_k e_k e_k^T`
    pub fn quadratic_form(&self) -> [[f64; 3]; 3] {
        let mut d = [[0.0; 3]; 3];
        for k in 0..3 {
            let e = self.evecs[k];
            for i in 0..3 {
                for j in 0..3 {
                    d[i][j] += self.evals[k] * e[i] * e[j];
                }
            }
        }
        d
    }

    /// Apparent diffusion coefficient along a unit direction, `g^T D g`
    pub fn adc(&self, g: [f64; 3]) -> f64 {
        (0..3)
            .map(|k| {
                let proj = self.evecs[k][0] * g[0] + self.evecs[k][1] * g[1] + self.evecs[k][2] * g[2];
                self.evals[k] * proj * proj
            })
            .sum()
    }

    /// Principal diffusion direction
    #[inline]
    pub fn principal_direction(&self) -> [f64; 3] {
        self.evecs[0]
    }

    pub fn is_zero(&self) -> bool {
        self.evals.iter().all(|&v| v == 0.0)
    }
}

/// Signal predicted by a tensor: `S0 * exp(-b g^T D g)`
pub fn tensor_signal(tensor: &TensorParams, bval: f64, bvec: [f64; 3], s0: f64) -> f64 {
    s0 * (-bval * tensor.adc(bvec)).exp()
}
