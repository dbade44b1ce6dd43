//! Brain masking
//!
//! Median-Otsu masking of diffusion data: average the low-b reference
//! volumes, median-filter the average a few times, threshold with Otsu and
//! optionally dilate. Binary morphology uses a 6-connected cross.

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::threshold::otsu_threshold;
use super::{count_nonzero, idx3d, unravel3d};
use crate::error::{Error, Result};

/// Parameters for [`median_otsu`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianOtsuParams {
    /// Indices of the volumes averaged into the reference image (usually the b0s)
    pub vol_idx: Vec<usize>,
    /// Radius (in voxels) of the cubic median window
    pub median_radius: usize,
    /// Number of median filter passes
    pub numpass: usize,
    /// Number of binary dilation passes applied after thresholding
    pub dilate: Option<usize>,
}

impl Default for MedianOtsuParams {
    fn default() -> Self {
        Self {
            vol_idx: vec![0],
            median_radius: 4,
            numpass: 4,
            dilate: None,
        }
    }
}

/// Mean of the selected volumes of a 4D series
///
/// Out-of-range indices are skipped with a warning. Fails if none are valid.
pub fn mean_of_volumes(data: &[f64], dims: (usize, usize, usize), nt: usize, vol_idx: &[usize]) -> Result<Vec<f64>> {
    let n = dims.0 * dims.1 * dims.2;
    if data.len() != n * nt {
        return Err(Error::shape_mismatch(
            format!("{} values ({} voxels x {} volumes)", n * nt, n, nt),
            data.len(),
        ));
    }

    let valid: Vec<usize> = vol_idx.iter().copied().filter(|&t| t < nt).collect();
    for &t in vol_idx.iter().filter(|&&t| t >= nt) {
        warn!("Reference volume index {} out of range (0..{}), skipping", t, nt);
    }
    if valid.is_empty() {
        return Err(Error::invalid(format!(
            "no valid reference volume index in {:?} for a series of {} volumes",
            vol_idx, nt
        )));
    }

    let mut mean = vec![0.0; n];
    for &t in &valid {
        for (m, &v) in mean.iter_mut().zip(&data[t * n..(t + 1) * n]) {
            *m += v;
        }
    }
    let scale = 1.0 / valid.len() as f64;
    mean.iter_mut().for_each(|m| *m *= scale);
    Ok(mean)
}

/// Mirror an out-of-range index back into `0..n` (edge sample repeated)
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let mut m = i.rem_euclid(period);
    if m >= n {
        m = period - 1 - m;
    }
    m as usize
}

/// Cubic median filter of half-width `radius` with reflected borders
pub fn median_filter_3d(data: &[f64], dims: (usize, usize, usize), radius: usize) -> Vec<f64> {
    if radius == 0 {
        return data.to_vec();
    }
    let (nx, ny, nz) = dims;
    let r = radius as isize;
    let window = (2 * radius + 1).pow(3);

    (0..nx * ny * nz)
        .into_par_iter()
        .map_init(
            || Vec::with_capacity(window),
            |buf, idx| {
                let (i, j, k) = unravel3d(idx, nx, ny);
                buf.clear();
                for dz in -r..=r {
                    let kk = reflect(k as isize + dz, nz);
                    for dy in -r..=r {
                        let jj = reflect(j as isize + dy, ny);
                        for dx in -r..=r {
                            let ii = reflect(i as isize + dx, nx);
                            buf.push(data[idx3d(ii, jj, kk, nx, ny)]);
                        }
                    }
                }
                let mid = buf.len() / 2;
                let (_, median, _) = buf.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
                *median
            },
        )
        .collect()
}

/// One pass of 6-connected binary dilation
fn dilate_once(mask: &[u8], dims: (usize, usize, usize)) -> Vec<u8> {
    let (nx, ny, nz) = dims;
    let mut dilated = mask.to_vec();

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if mask[idx3d(i, j, k, nx, ny)] == 0 {
                    continue;
                }
                if i > 0 { dilated[idx3d(i - 1, j, k, nx, ny)] = 1; }
                if i + 1 < nx { dilated[idx3d(i + 1, j, k, nx, ny)] = 1; }
                if j > 0 { dilated[idx3d(i, j - 1, k, nx, ny)] = 1; }
                if j + 1 < ny { dilated[idx3d(i, j + 1, k, nx, ny)] = 1; }
                if k > 0 { dilated[idx3d(i, j, k - 1, nx, ny)] = 1; }
                if k + 1 < nz { dilated[idx3d(i, j, k + 1, nx, ny)] = 1; }
            }
        }
    }

    dilated
}

/// One pass of 6-connected binary erosion. Voxels outside the volume count as background.
fn erode_once(mask: &[u8], dims: (usize, usize, usize)) -> Vec<u8> {
    let (nx, ny, nz) = dims;
    let mut eroded = vec![0u8; mask.len()];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if mask[idx3d(i, j, k, nx, ny)] == 0 {
                    continue;
                }
                let interior = i > 0 && i + 1 < nx && j > 0 && j + 1 < ny && k > 0 && k + 1 < nz;
                if interior
                    && mask[idx3d(i - 1, j, k, nx, ny)] != 0
                    && mask[idx3d(i + 1, j, k, nx, ny)] != 0
                    && mask[idx3d(i, j - 1, k, nx, ny)] != 0
                    && mask[idx3d(i, j + 1, k, nx, ny)] != 0
                    && mask[idx3d(i, j, k - 1, nx, ny)] != 0
                    && mask[idx3d(i, j, k + 1, nx, ny)] != 0
                {
                    eroded[idx3d(i, j, k, nx, ny)] = 1;
                }
            }
        }
    }

    eroded
}

/// Binary dilation, `iterations` passes
pub fn binary_dilate(mask: &[u8], dims: (usize, usize, usize), iterations: usize) -> Vec<u8> {
    (0..iterations).fold(mask.to_vec(), |m, _| dilate_once(&m, dims))
}

/// Binary erosion, `iterations` passes
pub fn binary_erode(mask: &[u8], dims: (usize, usize, usize), iterations: usize) -> Vec<u8> {
    (0..iterations).fold(mask.to_vec(), |m, _| erode_once(&m, dims))
}

/// Zero every volume of a 4D series outside the mask
pub fn apply_mask(data: &[f64], mask: &[u8]) -> Vec<f64> {
    let n = mask.len();
    data.iter()
        .enumerate()
        .map(|(idx, &v)| if mask[idx % n] != 0 { v } else { 0.0 })
        .collect()
}

/// Median-Otsu brain extraction
///
/// # Arguments
/// * `data` - 4D series, volume-major (`x + y*nx + z*nx*ny + t*nx*ny*nz`)
/// * `dims` - Spatial dimensions
/// * `nt` - Number of volumes
/// * `params` - Reference volumes, filter radius, passes and dilation
///
/// # Returns
/// (masked series, binary mask)
pub fn median_otsu(
    data: &[f64],
    dims: (usize, usize, usize),
    nt: usize,
    params: &MedianOtsuParams,
) -> Result<(Vec<f64>, Vec<u8>)> {
    if params.vol_idx.is_empty() {
        return Err(Error::invalid("median_otsu needs at least one reference volume index"));
    }

    let reference = mean_of_volumes(data, dims, nt, &params.vol_idx)?;

    let mut filtered = reference;
    for _ in 0..params.numpass {
        filtered = median_filter_3d(&filtered, dims, params.median_radius);
    }

    let threshold = otsu_threshold(&filtered, 256);
    let mut mask: Vec<u8> = filtered.iter().map(|&v| u8::from(v > threshold)).collect();
    debug!("median_otsu: threshold {:.4}, {} voxels before dilation", threshold, count_nonzero(&mask));

    if let Some(iterations) = params.dilate {
        mask = binary_dilate(&mask, dims, iterations);
    }

    Ok((apply_mask(data, &mask), mask))
}
