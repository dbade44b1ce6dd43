//! Direction getters: where a streamline goes next

use crate::peaks::PeaksField;
use crate::utils::idx3d;
use crate::volume::nearest_voxel;

/// Supplies propagation directions at voxel-space points
pub trait DirectionGetter: Send + Sync {
    /// Candidate directions to start tracking from a seed
    fn initial_directions(&self, point: [f64; 3]) -> Vec<[f64; 3]>;

    /// Next unit direction given the previous one, `None` to stop
    fn next_direction(&self, point: [f64; 3], previous: [f64; 3]) -> Option<[f64; 3]>;
}

#[inline]
fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Follows the stored peak closest to the previous direction
#[derive(Clone, Debug)]
pub struct PeaksDirectionGetter<'a> {
    peaks: &'a PeaksField,
    cos_max_angle: f64,
}

impl<'a> PeaksDirectionGetter<'a> {
    /// # Arguments
    /// * `peaks` - Peak field sampled at nearest voxels
    /// * `max_angle` - Largest allowed turn per step, degrees
    pub fn new(peaks: &'a PeaksField, max_angle: f64) -> Self {
        Self { peaks, cos_max_angle: max_angle.to_radians().cos() }
    }

    fn peaks_at(&self, point: [f64; 3]) -> &[[f64; 3]] {
        match nearest_voxel(point, self.peaks.dims) {
            Some((i, j, k)) => self.peaks.directions(idx3d(i, j, k, self.peaks.dims.0, self.peaks.dims.1)),
            None => &[],
        }
    }
}

impl DirectionGetter for PeaksDirectionGetter<'_> {
    fn initial_directions(&self, point: [f64; 3]) -> Vec<[f64; 3]> {
        self.peaks_at(point).to_vec()
    }

    fn next_direction(&self, point: [f64; 3], previous: [f64; 3]) -> Option<[f64; 3]> {
        let (best, cos) = self
            .peaks_at(point)
            .iter()
            .map(|&d| (d, dot(d, previous)))
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))?;

        if cos.abs() < self.cos_max_angle {
            return None;
        }
        Some(if cos < 0.0 { [-best[0], -best[1], -best[2]] } else { best })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_peak_field() -> PeaksField {
        let mut field = PeaksField::empty((1, 1, 1), 2);
        let s = std::f64::consts::FRAC_1_SQRT_2;
        field.indices = vec![0, 1];
        field.dirs = vec![[1.0, 0.0, 0.0], [s, s, 0.0]];
        field.values = vec![1.0, 0.5];
        field
    }

    #[test]
    fn test_picks_most_aligned_and_flips_sign() {
        let field = two_peak_field();
        let dg = PeaksDirectionGetter::new(&field, 60.0);
        assert_eq!(dg.initial_directions([0.0, 0.0, 0.0]).len(), 2);

        let d = dg.next_direction([0.0, 0.0, 0.0], [-1.0, 0.0, 0.0]).unwrap();
        assert_eq!(d, [-1.0, 0.0, 0.0]);

        let d = dg.next_direction([0.1, 0.0, 0.0], [0.0, 1.0, 0.0]).unwrap();
        assert!((d[1] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn test_sharp_turn_stops() {
        let field = two_peak_field();
        let dg = PeaksDirectionGetter::new(&field, 30.0);
        assert!(dg.next_direction([0.0, 0.0, 0.0], [0.0, 0.0, 1.0]).is_none());
    }

    #[test]
    fn test_outside_or_empty_has_no_direction() {
        let field = PeaksField::empty((1, 1, 1), 2);
        let dg = PeaksDirectionGetter::new(&field, 60.0);
        assert!(dg.initial_directions([0.0, 0.0, 0.0]).is_empty());
        assert!(dg.next_direction([0.0, 0.0, 0.0], [1.0, 0.0, 0.0]).is_none());

        let field = two_peak_field();
        let dg = PeaksDirectionGetter::new(&field, 60.0);
        assert!(dg.next_direction([2.0, 0.0, 0.0], [1.0, 0.0, 0.0]).is_none());
    }
}
