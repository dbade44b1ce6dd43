//! Space-aware streamline container
//!
//! A tractogram carries the reference image geometry so its points can be
//! moved between voxel, voxel-mm and world (RAS-mm) coordinates, and between
//! voxel-center and voxel-corner origins.

use log::{debug, warn};

use crate::error::Result;
use crate::space::{Affine, Origin, Space};
use crate::tracking::Streamline;
use crate::volume::point_in_volume;

/// Geometry of the image the streamlines belong to
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialReference {
    pub affine: Affine,
    pub dims: (usize, usize, usize),
    pub voxel_sizes: [f64; 3],
}

impl SpatialReference {
    pub fn new(affine: Affine, dims: (usize, usize, usize)) -> Self {
        Self { affine, dims, voxel_sizes: affine.voxel_sizes() }
    }
}

/// Streamlines together with their reference and declared space
#[derive(Clone, Debug)]
pub struct StatefulTractogram {
    pub streamlines: Vec<Streamline>,
    reference: SpatialReference,
    inv_affine: Affine,
    space: Space,
    origin: Origin,
}

impl StatefulTractogram {
    /// Wrap streamlines expressed in `space` with voxel-center origin
    pub fn new(streamlines: Vec<Streamline>, reference: SpatialReference, space: Space) -> Result<Self> {
        Self::with_origin(streamlines, reference, space, Origin::Nifti)
    }

    pub fn with_origin(
        streamlines: Vec<Streamline>,
        reference: SpatialReference,
        space: Space,
        origin: Origin,
    ) -> Result<Self> {
        let inv_affine = reference.affine.inverse()?;
        Ok(Self { streamlines, reference, inv_affine, space, origin })
    }

    pub fn reference(&self) -> &SpatialReference {
        &self.reference
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.streamlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamlines.is_empty()
    }

    fn shift(origin: Origin) -> f64 {
        match origin {
            Origin::Nifti => 0.0,
            Origin::TrackVis => 0.5,
        }
    }

    /// A point in (space, origin) to voxel coordinates with center origin
    fn to_voxel_center(&self, p: [f64; 3], space: Space, origin: Origin) -> [f64; 3] {
        let vs = self.reference.voxel_sizes;
        let v = match space {
            Space::Vox => p,
            Space::VoxMm => [p[0] / vs[0], p[1] / vs[1], p[2] / vs[2]],
            Space::RasMm => self.inv_affine.apply(p),
        };
        let s = Self::shift(origin);
        [v[0] - s, v[1] - s, v[2] - s]
    }

    /// Voxel-center coordinates to (space, origin)
    fn from_voxel_center(&self, v: [f64; 3], space: Space, origin: Origin) -> [f64; 3] {
        let s = Self::shift(origin);
        let v = [v[0] + s, v[1] + s, v[2] + s];
        let vs = self.reference.voxel_sizes;
        match space {
            Space::Vox => v,
            Space::VoxMm => [v[0] * vs[0], v[1] * vs[1], v[2] * vs[2]],
            Space::RasMm => self.reference.affine.apply(v),
        }
    }

    fn convert(&mut self, space: Space, origin: Origin) {
        if space == self.space && origin == self.origin {
            return;
        }
        let (from_space, from_origin) = (self.space, self.origin);
        let mut streamlines = std::mem::take(&mut self.streamlines);
        for line in streamlines.iter_mut() {
            for p in line.iter_mut() {
                let v = self.to_voxel_center(*p, from_space, from_origin);
                *p = self.from_voxel_center(v, space, origin);
            }
        }
        self.streamlines = streamlines;
        debug!("Converted tractogram from {:?}/{:?} to {:?}/{:?}", from_space, from_origin, space, origin);
        self.space = space;
        self.origin = origin;
    }

    /// Re-express every point in another space, keeping the origin
    pub fn to_space(&mut self, space: Space) {
        self.convert(space, self.origin);
    }

    pub fn to_vox(&mut self) {
        self.to_space(Space::Vox);
    }

    pub fn to_voxmm(&mut self) {
        self.to_space(Space::VoxMm);
    }

    pub fn to_rasmm(&mut self) {
        self.to_space(Space::RasMm);
    }

    /// Shift every point to another origin convention, keeping the space
    pub fn to_origin(&mut self, origin: Origin) {
        self.convert(self.space, origin);
    }

    /// Drop empty streamlines and those with a point outside the reference volume
    ///
    /// # Returns
    /// The number of streamlines removed
    pub fn remove_invalid_streamlines(&mut self) -> usize {
        let before = self.streamlines.len();
        let (space, origin) = (self.space, self.origin);
        let dims = self.reference.dims;

        let streamlines = std::mem::take(&mut self.streamlines);
        self.streamlines = streamlines
            .into_iter()
            .filter(|line| {
                !line.is_empty()
                    && line
                        .iter()
                        .all(|&p| point_in_volume(self.to_voxel_center(p, space, origin), dims))
            })
            .collect();

        let removed = before - self.streamlines.len();
        if removed > 0 {
            warn!("Removed {} of {} streamlines outside the reference volume", removed, before);
        }
        removed
    }

    /// Arc length of every streamline in mm
    pub fn lengths(&self) -> Vec<f64> {
        self.streamlines
            .iter()
            .map(|line| {
                let world: Vec<[f64; 3]> = line
                    .iter()
                    .map(|&p| {
                        let v = self.to_voxel_center(p, self.space, self.origin);
                        self.reference.affine.apply(v)
                    })
                    .collect();
                world
                    .windows(2)
                    .map(|w| {
                        let d = [w[1][0] - w[0][0], w[1][1] - w[0][1], w[1][2] - w[0][2]];
                        (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
                    })
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> SpatialReference {
        let affine = Affine::new([
            -1.5, 0.0, 0.1, 60.0,
            0.0, 2.0, 0.0, -80.0,
            0.05, 0.0, 2.5, -40.0,
            0.0, 0.0, 0.0, 1.0,
        ]);
        SpatialReference::new(affine, (40, 50, 30))
    }

    fn sample_lines() -> Vec<Streamline> {
        vec![
            vec![[1.0, 2.0, 3.0], [1.5, 2.5, 3.25], [2.0, 3.0, 3.5]],
            vec![[10.25, 20.0, 5.0]],
        ]
    }

    #[test]
    fn test_vox_ras_vox_near_identity() {
        let original = sample_lines();
        let mut sft = StatefulTractogram::new(original.clone(), reference(), Space::Vox).unwrap();
        sft.to_rasmm();
        assert_eq!(sft.space(), Space::RasMm);
        assert_ne!(sft.streamlines[0][0], original[0][0]);
        sft.to_vox();

        for (a, b) in sft.streamlines.iter().flatten().zip(original.iter().flatten()) {
            for c in 0..3 {
                assert!((a[c] - b[c]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_trackvis_origin_shift() {
        let reference = SpatialReference::new(Affine::from_scaling([2.0, 2.0, 2.0]), (10, 10, 10));
        let mut sft = StatefulTractogram::new(vec![vec![[0.0, 1.0, 2.0]]], reference, Space::Vox).unwrap();
        sft.to_origin(Origin::TrackVis);
        assert_eq!(sft.streamlines[0][0], [0.5, 1.5, 2.5]);
        sft.to_voxmm();
        assert_eq!(sft.streamlines[0][0], [1.0, 3.0, 5.0]);
        sft.to_origin(Origin::Nifti);
        sft.to_vox();
        assert_eq!(sft.streamlines[0][0], [0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_remove_invalid() {
        let reference = SpatialReference::new(Affine::identity(), (3, 3, 3));
        let lines = vec![
            vec![[0.0, 0.0, 0.0], [2.5, 2.5, 2.5]],
            vec![[0.0, 0.0, 0.0], [2.6, 1.0, 1.0]],
            vec![],
            vec![[-0.5, 1.0, 1.0]],
        ];
        let mut sft = StatefulTractogram::new(lines, reference, Space::RasMm).unwrap();
        assert_eq!(sft.remove_invalid_streamlines(), 2);
        assert_eq!(sft.len(), 2);
    }

    #[test]
    fn test_lengths_in_mm() {
        let reference = SpatialReference::new(Affine::from_scaling([2.0, 1.0, 1.0]), (10, 10, 10));
        let sft = StatefulTractogram::new(vec![vec![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [3.0, 4.0, 0.0]]], reference, Space::Vox)
            .unwrap();
        assert!((sft.lengths()[0] - 10.0).abs() < 1e-12);
    }
}
