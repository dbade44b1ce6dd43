//! Seed placement

use log::debug;

use crate::error::{Error, Result};
use crate::space::Affine;
use crate::utils::unravel3d;

/// Seed points on a regular sub-voxel grid inside every set mask voxel
///
/// Voxels are visited in storage order (x fastest). Within a voxel the
/// offsets along axis `a` are `(i + 0.5) / density[a] - 0.5` for
/// `i in 0..density[a]`, so a density of 1 seeds the voxel center.
///
/// # Arguments
/// * `mask` - Seed region, non-zero = seed
/// * `dims` - Volume dimensions
/// * `affine` - Voxel-to-world transform applied to every seed
/// * `density` - Seeds per voxel along each axis
///
/// # Returns
/// `density[0] * density[1] * density[2] * |mask|` world-space points
pub fn seeds_from_mask(
    mask: &[u8],
    dims: (usize, usize, usize),
    affine: &Affine,
    density: [usize; 3],
) -> Result<Vec<[f64; 3]>> {
    let (nx, ny, nz) = dims;
    if mask.len() != nx * ny * nz {
        return Err(Error::shape_mismatch(format!("mask of {} voxels", nx * ny * nz), mask.len()));
    }
    if density.iter().any(|&d| d == 0) {
        return Err(Error::invalid(format!("seed density must be positive, got {:?}", density)));
    }

    let offsets = |d: usize| -> Vec<f64> { (0..d).map(|i| (i as f64 + 0.5) / d as f64 - 0.5).collect() };
    let (ox, oy, oz) = (offsets(density[0]), offsets(density[1]), offsets(density[2]));
    let per_voxel = density[0] * density[1] * density[2];

    let n_set = mask.iter().filter(|&&m| m != 0).count();
    let mut seeds = Vec::with_capacity(n_set * per_voxel);
    for (idx, _) in mask.iter().enumerate().filter(|(_, &m)| m != 0) {
        let (i, j, k) = unravel3d(idx, nx, ny);
        for dz in &oz {
            for dy in &oy {
                for dx in &ox {
                    seeds.push(affine.apply([i as f64 + dx, j as f64 + dy, k as f64 + dz]));
                }
            }
        }
    }

    debug!("Placed {} seeds in {} voxels ({:?} per voxel)", seeds.len(), n_set, density);
    Ok(seeds)
}
