//! Stopping criteria evaluated at every propagation step
//!
//! Points are voxel coordinates with integer values at voxel centers.

use crate::error::{Error, Result};
use crate::volume::{nearest_voxel, point_in_volume, ScalarVolume};

/// Outcome of checking one propagated point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamlineStatus {
    /// Keep the point and continue
    TrackPoint,
    /// Keep the point and stop
    Endpoint,
    /// Drop the point and stop
    OutsideImage,
    /// Keep the point and stop; the criterion could not be evaluated
    InvalidPoint,
}

/// Decides whether propagation continues at a point
pub trait StoppingCriterion: Send + Sync {
    fn check_point(&self, point: [f64; 3]) -> StreamlineStatus;
}

/// Continue while the interpolated scalar value is at least `threshold`
#[derive(Clone, Debug)]
pub struct ThresholdStoppingCriterion {
    map: ScalarVolume,
    threshold: f64,
}

impl ThresholdStoppingCriterion {
    pub fn new(map: ScalarVolume, threshold: f64) -> Self {
        Self { map, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl StoppingCriterion for ThresholdStoppingCriterion {
    fn check_point(&self, point: [f64; 3]) -> StreamlineStatus {
        if point.iter().any(|v| !v.is_finite()) {
            return StreamlineStatus::InvalidPoint;
        }
        match self.map.interpolate(point) {
            None => StreamlineStatus::OutsideImage,
            Some(v) if v.is_nan() => StreamlineStatus::InvalidPoint,
            Some(v) if v >= self.threshold => StreamlineStatus::TrackPoint,
            Some(_) => StreamlineStatus::Endpoint,
        }
    }
}

/// Continue while the nearest voxel of a mask is set
#[derive(Clone, Debug)]
pub struct BinaryStoppingCriterion {
    mask: Vec<u8>,
    dims: (usize, usize, usize),
}

impl BinaryStoppingCriterion {
    pub fn new(mask: Vec<u8>, dims: (usize, usize, usize)) -> Result<Self> {
        let n = dims.0 * dims.1 * dims.2;
        if mask.len() != n {
            return Err(Error::shape_mismatch(format!("mask of {} voxels", n), mask.len()));
        }
        Ok(Self { mask, dims })
    }
}

impl StoppingCriterion for BinaryStoppingCriterion {
    fn check_point(&self, point: [f64; 3]) -> StreamlineStatus {
        if point.iter().any(|v| !v.is_finite()) {
            return StreamlineStatus::InvalidPoint;
        }
        if !point_in_volume(point, self.dims) {
            return StreamlineStatus::OutsideImage;
        }
        match nearest_voxel(point, self.dims) {
            Some((i, j, k)) if self.mask[i + j * self.dims.0 + k * self.dims.0 * self.dims.1] != 0 => {
                StreamlineStatus::TrackPoint
            }
            Some(_) => StreamlineStatus::Endpoint,
            None => StreamlineStatus::OutsideImage,
        }
    }
}
