//! Volume utilities shared across the pipeline
//!
//! - Otsu thresholding
//! - Median filtering, binary morphology and median-Otsu brain masking

pub mod threshold;
pub mod mask;

pub use threshold::*;
pub use mask::*;

/// Linear index of voxel `(i, j, k)` in Fortran order
#[inline(always)]
pub fn idx3d(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Inverse of [`idx3d`]
#[inline]
pub fn unravel3d(idx: usize, nx: usize, ny: usize) -> (usize, usize, usize) {
    let k = idx / (nx * ny);
    let rem = idx % (nx * ny);
    (rem % nx, rem / nx, k)
}

/// Number of non-zero voxels in a mask
pub fn count_nonzero(mask: &[u8]) -> usize {
    mask.iter().filter(|&&m| m != 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unravel_inverts_idx3d() {
        let (nx, ny, nz) = (4, 3, 5);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    assert_eq!(unravel3d(idx3d(i, j, k, nx, ny), nx, ny), (i, j, k));
                }
            }
        }
    }
}
