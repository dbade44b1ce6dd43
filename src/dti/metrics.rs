//! Scalar maps derived from tensor eigenvalues
//!
//! Per-tensor functions take eigenvalues directly; the `*_map` variants run
//! over a whole [`TensorFit`] and produce one value per voxel.

use log::warn;

use super::TensorFit;

/// Fractional anisotropy
///
/// `sqrt(1/2) * sqrt((l1-l2)² + (l2-l3)² + (l3-l1)²) / sqrt(l1² + l2² + l3²)`
///
/// Undefined (NaN) for the zero tensor; run [`sanitize_nonfinite`] on maps
/// before thresholding them.
pub fn fractional_anisotropy(evals: [f64; 3]) -> f64 {
    let [l1, l2, l3] = evals;
    let num = (l1 - l2).powi(2) + (l2 - l3).powi(2) + (l3 - l1).powi(2);
    let den = l1 * l1 + l2 * l2 + l3 * l3;
    (0.5 * num / den).sqrt()
}

#[inline]
pub fn mean_diffusivity(evals: [f64; 3]) -> f64 {
    (evals[0] + evals[1] + evals[2]) / 3.0
}

#[inline]
pub fn axial_diffusivity(evals: [f64; 3]) -> f64 {
    evals[0]
}

#[inline]
pub fn radial_diffusivity(evals: [f64; 3]) -> f64 {
    (evals[1] + evals[2]) / 2.0
}

/// Replace NaN and infinite values with 0
///
/// Finite values are left untouched, so applying it twice changes nothing.
///
/// # Returns
/// The number of values replaced
pub fn sanitize_nonfinite(values: &mut [f64]) -> usize {
    let mut replaced = 0;
    for v in values.iter_mut().filter(|v| !v.is_finite()) {
        *v = 0.0;
        replaced += 1;
    }
    replaced
}

/// FA for every voxel, zero tensors and non-finite results set to 0
pub fn fa_map(fit: &TensorFit) -> Vec<f64> {
    let mut fa: Vec<f64> = fit.tensors.iter().map(|t| fractional_anisotropy(t.evals)).collect();
    let background = fit.tensors.iter().filter(|t| t.is_zero()).count();
    let replaced = sanitize_nonfinite(&mut fa);
    if replaced > background {
        warn!("FA had {} non-finite values outside the background; set to 0", replaced - background);
    }
    for v in fa.iter_mut() {
        *v = v.clamp(0.0, 1.0);
    }
    fa
}

pub fn md_map(fit: &TensorFit) -> Vec<f64> {
    scalar_map(fit, mean_diffusivity)
}

pub fn ad_map(fit: &TensorFit) -> Vec<f64> {
    scalar_map(fit, axial_diffusivity)
}

pub fn rd_map(fit: &TensorFit) -> Vec<f64> {
    scalar_map(fit, radial_diffusivity)
}

fn scalar_map(fit: &TensorFit, f: fn([f64; 3]) -> f64) -> Vec<f64> {
    let mut map: Vec<f64> = fit.tensors.iter().map(|t| f(t.evals)).collect();
    sanitize_nonfinite(&mut map);
    map
}

/// Direction-encoded color FA: `|e1| * FA` per component
///
/// # Arguments
/// * `fa` - Sanitized FA map
/// * `evecs` - Principal eigenvector per voxel
///
/// # Returns
/// RGB triplets in `[0, 1]`, one per voxel
pub fn color_fa(fa: &[f64], evecs: &[[f64; 3]]) -> Vec<[f64; 3]> {
    fa.iter()
        .zip(evecs)
        .map(|(&f, e)| {
            let f = f.clamp(0.0, 1.0);
            [e[0].abs() * f, e[1].abs() * f, e[2].abs() * f]
        })
        .collect()
}
