//! Log-linear diffusion tensor fitting
//!
//! `ln S = B x` with `x = [Dxx, Dxy, Dyy, Dxz, Dyz, Dzz, ln S0]` and design
//! rows `[-b gx², -2b gx gy, -b gy², -2b gx gz, -2b gy gz, -b gz², 1]`.
//! OLS solves the normal equations once for the whole volume; WLS reweights
//! each voxel by its squared OLS-predicted signal.

use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::TensorParams;
use crate::error::{Error, Result};
use crate::gradients::GradientTable;

const NPARAMS: usize = 7;

/// Fitting strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Ordinary least squares on the log signal
    Ols,
    /// Weighted least squares, weights = predicted signal squared
    Wls,
}

/// Parameters for [`TensorModel`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorModelParams {
    pub fit_method: FitMethod,
    /// Signal values are clipped to at least this before taking the log
    pub min_signal: f64,
}

impl Default for TensorModelParams {
    fn default() -> Self {
        Self {
            fit_method: FitMethod::Wls,
            min_signal: 1e-4,
        }
    }
}

/// Fitted tensors for a whole volume
#[derive(Clone, Debug)]
pub struct TensorFit {
    pub dims: (usize, usize, usize),
    /// Per-voxel tensor; zero outside the mask and where the fit failed
    pub tensors: Vec<TensorParams>,
    /// Per-voxel S0 estimate
    pub s0: Vec<f64>,
}

impl TensorFit {
    pub fn n_voxels(&self) -> usize {
        self.tensors.len()
    }

    /// Eigenvalues of every voxel
    pub fn evals(&self) -> Vec<[f64; 3]> {
        self.tensors.iter().map(|t| t.evals).collect()
    }

    /// Principal eigenvector of every voxel
    pub fn principal_directions(&self) -> Vec<[f64; 3]> {
        self.tensors.iter().map(|t| t.principal_direction()).collect()
    }
}

/// Solve a dense linear system by Gaussian elimination with partial pivoting
///
/// Returns `None` when a pivot falls below `1e-12` relative to the largest entry.
pub(crate) fn solve_linear<const K: usize>(mut a: [[f64; K]; K], mut b: [f64; K]) -> Option<[f64; K]> {
    let scale = a.iter().flatten().fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let tol = scale * 1e-12;

    for col in 0..K {
        let pivot = (col..K).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < tol {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..K {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..K {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; K];
    for row in (0..K).rev() {
        let tail: f64 = (row + 1..K).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Diffusion tensor model bound to a gradient table
#[derive(Clone, Debug)]
pub struct TensorModel {
    design: Vec<[f64; NPARAMS]>,
    /// Design columns divided by their norms, for better-conditioned normal equations
    scaled: Vec<[f64; NPARAMS]>,
    col_scale: [f64; NPARAMS],
    /// (BᵀB)⁻¹Bᵀ, one NPARAMS row per volume
    pinv: Vec<[f64; NPARAMS]>,
    params: TensorModelParams,
}

impl TensorModel {
    /// Build the design matrix and its pseudo-inverse
    ///
    /// Fails when the table cannot determine a tensor (fewer than six
    /// non-collinear diffusion-weighted directions plus a reference).
    pub fn new(gtab: &GradientTable, params: TensorModelParams) -> Result<Self> {
        let design: Vec<[f64; NPARAMS]> = gtab
            .bvals
            .iter()
            .zip(&gtab.bvecs)
            .map(|(&b, g)| {
                [
                    -b * g[0] * g[0],
                    -2.0 * b * g[0] * g[1],
                    -b * g[1] * g[1],
                    -2.0 * b * g[0] * g[2],
                    -2.0 * b * g[1] * g[2],
                    -b * g[2] * g[2],
                    1.0,
                ]
            })
            .collect();

        let singular = || {
            Error::invalid(format!(
                "tensor design matrix is singular for {} volumes; need a b0 and at least 6 non-collinear directions",
                design.len()
            ))
        };

        let mut col_scale = [0.0; NPARAMS];
        for (j, scale) in col_scale.iter_mut().enumerate() {
            *scale = design.iter().map(|row| row[j] * row[j]).sum::<f64>().sqrt();
            if *scale == 0.0 {
                return Err(singular());
            }
        }
        let scaled: Vec<[f64; NPARAMS]> = design
            .iter()
            .map(|row| {
                let mut out = *row;
                for (v, s) in out.iter_mut().zip(&col_scale) {
                    *v /= s;
                }
                out
            })
            .collect();

        let btb = normal_matrix(&scaled, None);
        let mut inv = [[0.0; NPARAMS]; NPARAMS];
        for c in 0..NPARAMS {
            let mut unit = [0.0; NPARAMS];
            unit[c] = 1.0;
            let col = solve_linear(btb, unit).ok_or_else(singular)?;
            for r in 0..NPARAMS {
                inv[r][c] = col[r];
            }
        }

        let pinv = scaled
            .iter()
            .map(|row| {
                let mut out = [0.0; NPARAMS];
                for (p, o) in out.iter_mut().enumerate() {
                    *o = (0..NPARAMS).map(|q| inv[p][q] * row[q]).sum::<f64>() / col_scale[p];
                }
                out
            })
            .collect();

        Ok(Self { design, scaled, col_scale, pinv, params })
    }

    pub fn n_volumes(&self) -> usize {
        self.design.len()
    }

    fn ols(&self, log_signal: &[f64]) -> [f64; NPARAMS] {
        let mut x = [0.0; NPARAMS];
        for (row, &y) in self.pinv.iter().zip(log_signal) {
            for p in 0..NPARAMS {
                x[p] += row[p] * y;
            }
        }
        x
    }

    fn wls(&self, log_signal: &[f64], ols: &[f64; NPARAMS]) -> Option<[f64; NPARAMS]> {
        let predicted: Vec<f64> = self
            .design
            .iter()
            .map(|row| 2.0 * row.iter().zip(ols).map(|(a, b)| a * b).sum::<f64>())
            .collect();
        // exp(2Bx) rescaled by its maximum; a common factor leaves the solution unchanged
        let max_log = predicted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max_log.is_finite() {
            return None;
        }
        let weights: Vec<f64> = predicted.iter().map(|p| (p - max_log).exp()).collect();

        let a = normal_matrix(&self.scaled, Some(&weights));
        let mut rhs = [0.0; NPARAMS];
        for ((row, &w), &y) in self.scaled.iter().zip(&weights).zip(log_signal) {
            for p in 0..NPARAMS {
                rhs[p] += w * row[p] * y;
            }
        }
        let mut x = solve_linear(a, rhs)?;
        for (v, s) in x.iter_mut().zip(&self.col_scale) {
            *v /= s;
        }
        Some(x)
    }

    /// Fit one voxel's signal (one value per volume)
    ///
    /// Returns the tensor and S0, or `None` when the fit is degenerate.
    pub fn fit_voxel(&self, signal: &[f64]) -> Option<(TensorParams, f64)> {
        if signal.len() != self.n_volumes() || signal.iter().all(|&s| s <= 0.0) {
            return None;
        }
        let min_signal = self.params.min_signal;
        let log_signal: Vec<f64> = signal.iter().map(|&s| s.max(min_signal).ln()).collect();

        let ols = self.ols(&log_signal);
        let x = match self.params.fit_method {
            FitMethod::Ols => ols,
            FitMethod::Wls => self.wls(&log_signal, &ols).unwrap_or(ols),
        };
        if x.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let tensor = TensorParams::from_lower_triangular([x[0], x[1], x[2], x[3], x[4], x[5]]);
        if tensor.evals.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some((tensor, x[6].exp()))
    }

    /// Fit every masked voxel of a 4D series
    ///
    /// # Arguments
    /// * `data` - 4D series, volume-major (`x + y*nx + z*nx*ny + t*nx*ny*nz`)
    /// * `dims` - Spatial dimensions
    /// * `mask` - Optional brain mask; voxels outside get a zero tensor
    pub fn fit(&self, data: &[f64], dims: (usize, usize, usize), mask: Option<&[u8]>) -> Result<TensorFit> {
        let n = dims.0 * dims.1 * dims.2;
        let nt = self.n_volumes();
        if data.len() != n * nt {
            return Err(Error::shape_mismatch(
                format!("{} values ({} voxels x {} volumes)", n * nt, n, nt),
                data.len(),
            ));
        }
        if let Some(m) = mask {
            if m.len() != n {
                return Err(Error::shape_mismatch(format!("mask of {} voxels", n), m.len()));
            }
        }

        let start = Instant::now();
        let results: Vec<Option<(TensorParams, f64)>> = (0..n)
            .into_par_iter()
            .map_init(
                || vec![0.0; nt],
                |signal, idx| {
                    if mask.map_or(false, |m| m[idx] == 0) {
                        return None;
                    }
                    for (t, s) in signal.iter_mut().enumerate() {
                        *s = data[t * n + idx];
                    }
                    self.fit_voxel(signal)
                },
            )
            .collect();

        let fitted = results.iter().filter(|r| r.is_some()).count();
        let (tensors, s0): (Vec<TensorParams>, Vec<f64>) = results
            .into_iter()
            .map(|r| r.unwrap_or((TensorParams::zero(), 0.0)))
            .unzip();

        let in_mask = mask.map_or(n, |m| m.iter().filter(|&&v| v != 0).count());
        info!("Fitted {} tensors ({:?}) in {:.2?}", fitted, self.params.fit_method, start.elapsed());
        if fitted < in_mask {
            debug!("{} masked voxels had degenerate fits and were zeroed", in_mask - fitted);
        }

        Ok(TensorFit { dims, tensors, s0 })
    }
}

/// `Bᵀ W B` for an optional diagonal weight
fn normal_matrix(design: &[[f64; NPARAMS]], weights: Option<&[f64]>) -> [[f64; NPARAMS]; NPARAMS] {
    let mut a = [[0.0; NPARAMS]; NPARAMS];
    for (t, row) in design.iter().enumerate() {
        let w = weights.map_or(1.0, |w| w[t]);
        for i in 0..NPARAMS {
            for j in 0..NPARAMS {
                a[i][j] += w * row[i] * row[j];
            }
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dti::tensor_signal;
    use crate::gradients::DEFAULT_B0_THRESHOLD;

    /// b0 plus the 6 edge-midpoint directions of a cube and 6 more oblique ones
    fn test_gtab() -> GradientTable {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let t = 1.0 / 3.0f64.sqrt();
        let dirs = vec![
            [0.0, 0.0, 0.0],
            [s, s, 0.0], [s, -s, 0.0], [s, 0.0, s],
            [s, 0.0, -s], [0.0, s, s], [0.0, s, -s],
            [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0],
            [t, t, t], [t, -t, t], [-t, t, t],
        ];
        let mut bvals = vec![1000.0; dirs.len()];
        bvals[0] = 0.0;
        GradientTable::new(bvals, dirs, DEFAULT_B0_THRESHOLD).unwrap()
    }

    fn prolate_x() -> TensorParams {
        TensorParams::from_eigen(
            [1.7e-3, 0.3e-3, 0.2e-3],
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        )
    }

    #[test]
    fn test_solve_linear() {
        let a = [[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]];
        let x = solve_linear(a, [3.0, 5.0, 5.0]).unwrap();
        for v in x {
            assert!((v - 1.0).abs() < 1e-12);
        }
        assert!(solve_linear([[1.0, 2.0], [2.0, 4.0]], [1.0, 2.0]).is_none());
    }

    #[test]
    fn test_singular_table_rejected() {
        let gtab = GradientTable::new(
            vec![0.0, 1000.0, 1000.0],
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap();
        assert!(matches!(
            TensorModel::new(&gtab, TensorModelParams::default()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_noiseless_fit_recovers_tensor() {
        let gtab = test_gtab();
        let truth = prolate_x();
        let signal: Vec<f64> = gtab
            .bvals
            .iter()
            .zip(&gtab.bvecs)
            .map(|(&b, &g)| tensor_signal(&truth, b, g, 120.0))
            .collect();

        for method in [FitMethod::Ols, FitMethod::Wls] {
            let model = TensorModel::new(&gtab, TensorModelParams { fit_method: method, ..Default::default() }).unwrap();
            let (fit, s0) = model.fit_voxel(&signal).unwrap();
            for k in 0..3 {
                assert!((fit.evals[k] - truth.evals[k]).abs() < 1e-8, "{:?} eval {}", method, k);
            }
            assert!((fit.evecs[0][0].abs() - 1.0).abs() < 1e-6);
            assert!((s0 - 120.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_volume_fit_respects_mask() {
        let gtab = test_gtab();
        let truth = prolate_x();
        let dims = (2, 1, 1);
        let n = 2;
        let nt = gtab.len();
        let mut data = vec![0.0; n * nt];
        for t in 0..nt {
            let s = tensor_signal(&truth, gtab.bvals[t], gtab.bvecs[t], 100.0);
            data[t * n] = s;
            data[t * n + 1] = s;
        }

        let model = TensorModel::new(&gtab, TensorModelParams::default()).unwrap();
        let fit = model.fit(&data, dims, Some(&[1, 0])).unwrap();
        assert!((fit.tensors[0].evals[0] - 1.7e-3).abs() < 1e-8);
        assert!(fit.tensors[1].is_zero());
        assert_eq!(fit.s0[1], 0.0);
    }

    #[test]
    fn test_zero_signal_is_degenerate_not_fatal() {
        let gtab = test_gtab();
        let model = TensorModel::new(&gtab, TensorModelParams::default()).unwrap();
        assert!(model.fit_voxel(&vec![0.0; gtab.len()]).is_none());

        let dims = (1, 1, 1);
        let fit = model.fit(&vec![0.0; gtab.len()], dims, None).unwrap();
        assert!(fit.tensors[0].is_zero());
    }

    #[test]
    fn test_fit_shape_mismatch() {
        let gtab = test_gtab();
        let model = TensorModel::new(&gtab, TensorModelParams::default()).unwrap();
        let result = model.fit(&[1.0; 5], (1, 1, 1), None);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
