//! Single-shell single-tissue fiber response estimate
//!
//! The response is the mean tensor of highly anisotropic voxels in a cubic
//! region of interest, the input a spherical deconvolution step would take.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::dti::{fractional_anisotropy, TensorModel, TensorModelParams};
use crate::error::{Error, Result};
use crate::gradients::GradientTable;
use crate::utils::idx3d;

/// Parameters for [`auto_response_ssst`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseParams {
    /// ROI center in voxels; the volume center when `None`
    pub roi_center: Option<[usize; 3]>,
    /// Half-width of the cubic ROI in voxels
    pub roi_radius: usize,
    /// Only voxels with FA above this contribute
    pub fa_threshold: f64,
}

impl Default for ResponseParams {
    fn default() -> Self {
        Self {
            roi_center: None,
            roi_radius: 10,
            fa_threshold: 0.7,
        }
    }
}

/// Estimated response: axially symmetric tensor plus reference signal
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseFunction {
    /// `[λ∥, λ⊥, λ⊥]`
    pub evals: [f64; 3],
    /// Mean b0 signal of the contributing voxels
    pub s0: f64,
    /// `λ⊥ / λ∥`
    pub ratio: f64,
    /// Number of contributing voxels
    pub count: usize,
}

/// Estimate the fiber response from the most anisotropic voxels of an ROI
///
/// # Arguments
/// * `gtab` - Gradient table of the series
/// * `data` - 4D series, volume-major
/// * `dims` - Spatial dimensions
/// * `params` - ROI and FA selection
/// * `model_params` - Tensor fit settings, shared with the main fit
pub fn auto_response_ssst(
    gtab: &GradientTable,
    data: &[f64],
    dims: (usize, usize, usize),
    params: &ResponseParams,
    model_params: &TensorModelParams,
) -> Result<ResponseFunction> {
    let (nx, ny, nz) = dims;
    let n = nx * ny * nz;
    if n == 0 {
        return Err(Error::invalid("empty volume"));
    }
    let nt = gtab.len();
    if data.len() != n * nt {
        return Err(Error::shape_mismatch(format!("{} values", n * nt), data.len()));
    }
    let b0s = gtab.b0_indices();
    if b0s.is_empty() {
        return Err(Error::invalid("response estimation needs at least one b0 volume"));
    }

    let center = params.roi_center.unwrap_or([nx / 2, ny / 2, nz / 2]);
    let r = params.roi_radius;
    let span = |c: usize, d: usize| (c.saturating_sub(r), (c + r + 1).min(d));
    let (x0, x1) = span(center[0], nx);
    let (y0, y1) = span(center[1], ny);
    let (z0, z1) = span(center[2], nz);

    let mut roi = vec![0u8; n];
    for k in z0..z1 {
        for j in y0..y1 {
            for i in x0..x1 {
                roi[idx3d(i, j, k, nx, ny)] = 1;
            }
        }
    }

    let model = TensorModel::new(gtab, model_params.clone())?;
    let fit = model.fit(data, dims, Some(&roi))?;

    let mut sum_par = 0.0;
    let mut sum_perp = 0.0;
    let mut sum_s0 = 0.0;
    let mut count = 0usize;
    for (idx, tensor) in fit.tensors.iter().enumerate() {
        if roi[idx] == 0 || tensor.is_zero() {
            continue;
        }
        let fa = fractional_anisotropy(tensor.evals);
        if !(fa > params.fa_threshold) {
            continue;
        }
        sum_par += tensor.evals[0];
        sum_perp += (tensor.evals[1] + tensor.evals[2]) / 2.0;
        sum_s0 += b0s.iter().map(|&t| data[t * n + idx]).sum::<f64>() / b0s.len() as f64;
        count += 1;
    }

    if count == 0 {
        return Err(Error::invalid(format!(
            "no voxel in the ROI has FA above {}; lower fa_threshold or move the ROI",
            params.fa_threshold
        )));
    }
    if count < 100 {
        warn!("Response estimated from only {} voxels", count);
    }

    let c = count as f64;
    let (par, perp) = (sum_par / c, sum_perp / c);
    let response = ResponseFunction {
        evals: [par, perp, perp],
        s0: sum_s0 / c,
        ratio: perp / par,
        count,
    };
    info!(
        "Response: evals [{:.3e}, {:.3e}, {:.3e}], S0 {:.1}, ratio {:.3} from {} voxels",
        par, perp, perp, response.s0, response.ratio, count
    );
    Ok(response)
}

/// Write the response as two rows: `λ1 λ2 λ3` and `S0 ratio count`
pub fn save_response(path: &Path, response: &ResponseFunction) -> Result<()> {
    let e = response.evals;
    let text = format!(
        "{:e} {:e} {:e}\n{} {} {}\n",
        e[0], e[1], e[2], response.s0, response.ratio, response.count
    );
    std::fs::write(path, text)?;
    Ok(())
}

/// Read a response written by [`save_response`]
pub fn load_response(path: &Path) -> Result<ResponseFunction> {
    if !path.exists() {
        return Err(Error::FileNotFound { path: path.to_path_buf() });
    }
    let text = std::fs::read_to_string(path)?;
    let rows: Vec<Vec<f64>> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            l.split_whitespace()
                .map(|tok| tok.parse::<f64>().map_err(|_| Error::Format(format!("{}: '{}' is not a number", path.display(), tok))))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<_>>()?;

    match rows.as_slice() {
        [evals, rest] if evals.len() == 3 && rest.len() == 3 => Ok(ResponseFunction {
            evals: [evals[0], evals[1], evals[2]],
            s0: rest[0],
            ratio: rest[1],
            count: rest[2].max(0.0) as usize,
        }),
        _ => Err(Error::Format(format!("{}: expected two rows of three values", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dti::{tensor_signal, FitMethod, TensorParams};
    use crate::gradients::DEFAULT_B0_THRESHOLD;

    fn gtab() -> GradientTable {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let dirs = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0],
            [s, s, 0.0], [s, 0.0, s], [0.0, s, s], [s, -s, 0.0],
        ];
        let mut bvals = vec![1000.0; dirs.len()];
        bvals[0] = 0.0;
        GradientTable::new(bvals, dirs, DEFAULT_B0_THRESHOLD).unwrap()
    }

    /// Anisotropic tensor in voxels with x < split, isotropic elsewhere
    fn phantom(dims: (usize, usize, usize), split: usize, gtab: &GradientTable) -> Vec<f64> {
        let axes = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let fiber = TensorParams::from_eigen([1.8e-3, 0.2e-3, 0.2e-3], axes);
        let iso = TensorParams::from_eigen([0.8e-3, 0.8e-3, 0.8e-3], axes);
        let n = dims.0 * dims.1 * dims.2;
        let mut data = vec![0.0; n * gtab.len()];
        for idx in 0..n {
            let tensor = if idx % dims.0 < split { &fiber } else { &iso };
            for t in 0..gtab.len() {
                data[t * n + idx] = tensor_signal(tensor, gtab.bvals[t], gtab.bvecs[t], 150.0);
            }
        }
        data
    }

    #[test]
    fn test_response_from_anisotropic_voxels() {
        let gtab = gtab();
        let dims = (6, 4, 4);
        let data = phantom(dims, 3, &gtab);
        let response = auto_response_ssst(&gtab, &data, dims, &ResponseParams::default(), &TensorModelParams::default()).unwrap();

        assert_eq!(response.count, 3 * 4 * 4);
        assert!((response.evals[0] - 1.8e-3).abs() < 1e-8);
        assert!((response.evals[1] - 0.2e-3).abs() < 1e-8);
        assert!((response.s0 - 150.0).abs() < 1e-9);
        assert!((response.ratio - 0.2 / 1.8).abs() < 1e-5);
    }

    #[test]
    fn test_no_anisotropic_voxel_fails() {
        let gtab = gtab();
        let dims = (4, 4, 4);
        let data = phantom(dims, 0, &gtab);
        let result = auto_response_ssst(&gtab, &data, dims, &ResponseParams::default(), &TensorModelParams::default());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_fit_settings_are_honored() {
        let gtab = gtab();
        let dims = (6, 4, 4);
        let data = phantom(dims, 3, &gtab);

        let ols = TensorModelParams { fit_method: FitMethod::Ols, ..Default::default() };
        let response = auto_response_ssst(&gtab, &data, dims, &ResponseParams::default(), &ols).unwrap();
        assert_eq!(response.count, 3 * 4 * 4);

        // Clipping every weighted signal to the same floor leaves an isotropic fit
        let clipped = TensorModelParams { min_signal: 140.0, ..Default::default() };
        let result = auto_response_ssst(&gtab, &data, dims, &ResponseParams::default(), &clipped);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_save_load() {
        let response = ResponseFunction { evals: [1.7e-3, 0.35e-3, 0.35e-3], s0: 812.5, ratio: 0.205882, count: 311 };
        let path = std::env::temp_dir().join(format!("dmri_response_{}.txt", std::process::id()));
        save_response(&path, &response).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(load_response(&path).unwrap(), response);
        std::fs::remove_file(&path).ok();
    }
}
