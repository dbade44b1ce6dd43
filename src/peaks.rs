//! Peak extraction on a discrete sphere
//!
//! The tensor ODF is sampled on the sphere vertices, local maxima are found
//! over the sphere's edge graph, and the maxima are filtered by a relative
//! threshold and a minimum separation angle. Directions are axial: `v` and
//! `-v` count as the same peak.

use std::f64::consts::PI;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dti::{TensorFit, TensorParams};
use crate::error::{Error, Result};
use crate::sphere::Sphere;

/// Eigenvalues are floored at this fraction of the largest one so the ODF
/// stays finite for flat (clamped-to-zero) tensors
const MIN_EVAL_RATIO: f64 = 1e-3;

/// ODFs whose range is below this fraction of their maximum count as isotropic
const ISOTROPY_TOL: f64 = 1e-10;

/// Parameters for [`peaks_from_model`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeaksParams {
    /// Geodesic frequency of the sampling sphere (6 = 362 vertices)
    pub sphere_frequency: usize,
    /// Keep peaks with value >= this fraction of the strongest peak
    pub relative_peak_threshold: f64,
    /// Minimum angle in degrees between two retained peaks
    pub min_separation_angle: f64,
    /// Maximum peaks stored per voxel
    pub npeaks: usize,
}

impl Default for PeaksParams {
    fn default() -> Self {
        Self {
            sphere_frequency: 6,
            relative_peak_threshold: 0.2,
            min_separation_angle: 25.0,
            npeaks: 2,
        }
    }
}

/// Tensor ODF `1 / (4π sqrt(det D) (uᵀD⁻¹u)^{3/2})` on every sphere vertex
///
/// Returns all zeros for the zero tensor.
pub fn tensor_odf(tensor: &TensorParams, sphere: &Sphere) -> Vec<f64> {
    let l1 = tensor.evals[0];
    if !(l1 > 0.0) {
        return vec![0.0; sphere.len()];
    }
    let floor = l1 * MIN_EVAL_RATIO;
    let evals = tensor.evals.map(|l| l.max(floor));
    let norm = 4.0 * PI * (evals[0] * evals[1] * evals[2]).sqrt();

    sphere
        .vertices()
        .iter()
        .map(|u| {
            let q: f64 = (0..3)
                .map(|k| {
                    let e = tensor.evecs[k];
                    let p = e[0] * u[0] + e[1] * u[1] + e[2] * u[2];
                    p * p / evals[k]
                })
                .sum();
            1.0 / (norm * q.powf(1.5))
        })
        .collect()
}

/// Vertices whose value is not exceeded by any neighbor
fn local_maxima(odf: &[f64], sphere: &Sphere) -> Vec<usize> {
    (0..sphere.len())
        .filter(|&i| sphere.neighbors(i).iter().all(|&j| odf[j] <= odf[i]))
        .collect()
}

/// Find the dominant directions of a sampled ODF
///
/// # Arguments
/// * `odf` - One value per sphere vertex
/// * `sphere` - Sampling sphere
/// * `relative_peak_threshold` - Keep peaks >= this fraction of the largest
/// * `min_separation_angle` - Degrees; weaker peaks closer than this to a
///   retained one (axially) are dropped
///
/// # Returns
/// `(vertex index, value)` pairs, strongest first. Values are offset by the
/// ODF minimum (when positive). An isotropic or empty ODF has no peaks.
pub fn peak_directions(
    odf: &[f64],
    sphere: &Sphere,
    relative_peak_threshold: f64,
    min_separation_angle: f64,
) -> Vec<(usize, f64)> {
    if odf.len() != sphere.len() || odf.iter().any(|v| !v.is_finite()) {
        return Vec::new();
    }
    let odf_min = odf.iter().copied().fold(f64::INFINITY, f64::min).max(0.0);
    let odf_max = odf.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut maxima: Vec<(usize, f64)> = local_maxima(odf, sphere)
        .into_iter()
        .map(|i| (i, odf[i] - odf_min))
        .collect();
    maxima.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let top = match maxima.first() {
        Some(&(_, v)) if v > ISOTROPY_TOL * odf_max.abs() && v > 0.0 => v,
        _ => return Vec::new(),
    };
    maxima.retain(|&(_, v)| v >= relative_peak_threshold * top);

    let cos_sep = min_separation_angle.to_radians().cos();
    let mut kept: Vec<(usize, f64)> = Vec::with_capacity(maxima.len());
    for (i, v) in maxima {
        let u = sphere.vertex(i);
        let too_close = kept.iter().any(|&(j, _)| {
            let w = sphere.vertex(j);
            (u[0] * w[0] + u[1] * w[1] + u[2] * w[2]).abs() > cos_sep
        });
        if !too_close {
            kept.push((i, v));
        }
    }
    kept
}

/// Generalized fractional anisotropy `std(ψ) / rms(ψ)`
pub fn gfa(odf: &[f64]) -> f64 {
    let n = odf.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean = odf.iter().sum::<f64>() / n;
    let sq: f64 = odf.iter().map(|v| v * v).sum();
    if sq == 0.0 {
        return 0.0;
    }
    let var: f64 = odf.iter().map(|v| (v - mean).powi(2)).sum();
    (n * var / ((n - 1.0) * sq)).sqrt()
}

/// Per-voxel discrete peak directions
#[derive(Clone, Debug)]
pub struct PeaksField {
    pub dims: (usize, usize, usize),
    /// Slots per voxel
    pub npeaks: usize,
    /// Sphere vertex per slot, `-1` for unused slots (unused slots are trailing)
    pub indices: Vec<i32>,
    /// Unit direction per slot
    pub dirs: Vec<[f64; 3]>,
    /// Peak value per slot
    pub values: Vec<f64>,
    /// GFA per voxel
    pub gfa: Vec<f64>,
}

impl PeaksField {
    /// A field with every slot empty
    pub fn empty(dims: (usize, usize, usize), npeaks: usize) -> Self {
        let n = dims.0 * dims.1 * dims.2;
        Self {
            dims,
            npeaks,
            indices: vec![-1; n * npeaks],
            dirs: vec![[0.0; 3]; n * npeaks],
            values: vec![0.0; n * npeaks],
            gfa: vec![0.0; n],
        }
    }

    pub fn n_voxels(&self) -> usize {
        self.gfa.len()
    }

    /// Number of filled slots at a voxel
    pub fn count(&self, voxel: usize) -> usize {
        let start = voxel * self.npeaks;
        self.indices[start..start + self.npeaks].iter().take_while(|&&i| i >= 0).count()
    }

    /// Retained directions at a voxel, strongest first
    pub fn directions(&self, voxel: usize) -> &[[f64; 3]] {
        let start = voxel * self.npeaks;
        &self.dirs[start..start + self.count(voxel)]
    }

    pub fn peak_values(&self, voxel: usize) -> &[f64] {
        let start = voxel * self.npeaks;
        &self.values[start..start + self.count(voxel)]
    }

    /// Value of the strongest peak per voxel
    pub fn max_values(&self) -> Vec<f64> {
        (0..self.n_voxels())
            .map(|v| self.peak_values(v).first().copied().unwrap_or(0.0))
            .collect()
    }
}

/// Extract peaks for every masked voxel of a tensor fit
pub fn peaks_from_model(
    fit: &TensorFit,
    sphere: &Sphere,
    params: &PeaksParams,
    mask: Option<&[u8]>,
) -> Result<PeaksField> {
    if params.npeaks == 0 {
        return Err(Error::invalid("npeaks must be at least 1"));
    }
    let n = fit.n_voxels();
    if let Some(m) = mask {
        if m.len() != n {
            return Err(Error::shape_mismatch(format!("mask of {} voxels", n), m.len()));
        }
    }

    let start = Instant::now();
    let per_voxel: Vec<(Vec<(usize, f64)>, f64)> = fit
        .tensors
        .par_iter()
        .enumerate()
        .map(|(idx, tensor)| {
            if tensor.is_zero() || mask.map_or(false, |m| m[idx] == 0) {
                return (Vec::new(), 0.0);
            }
            let odf = tensor_odf(tensor, sphere);
            let mut peaks = peak_directions(
                &odf,
                sphere,
                params.relative_peak_threshold,
                params.min_separation_angle,
            );
            peaks.truncate(params.npeaks);
            (peaks, gfa(&odf))
        })
        .collect();

    let mut field = PeaksField::empty(fit.dims, params.npeaks);
    let mut with_peaks = 0usize;
    for (voxel, (peaks, g)) in per_voxel.into_iter().enumerate() {
        field.gfa[voxel] = g;
        if !peaks.is_empty() {
            with_peaks += 1;
        }
        for (slot, (vertex, value)) in peaks.into_iter().enumerate() {
            let s = voxel * params.npeaks + slot;
            field.indices[s] = vertex as i32;
            field.dirs[s] = sphere.vertex(vertex);
            field.values[s] = value;
        }
    }

    info!(
        "Extracted peaks in {} of {} voxels on a {}-vertex sphere in {:.2?}",
        with_peaks,
        n,
        sphere.len(),
        start.elapsed()
    );
    debug!(
        "Peak parameters: relative threshold {}, min separation {}°, npeaks {}",
        params.relative_peak_threshold, params.min_separation_angle, params.npeaks
    );
    Ok(field)
}
