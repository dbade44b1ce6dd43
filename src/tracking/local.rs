//! Local (step-by-step) streamline propagation
//!
//! Each seed is traced forward and backward along every initial direction;
//! the two halves are joined through the seed. Propagation happens in voxel
//! space with the step scaled by the voxel size, so `step_size` is in mm.

use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::direction::DirectionGetter;
use super::stopping::{StoppingCriterion, StreamlineStatus};
use crate::error::{Error, Result};
use crate::space::Affine;

/// An ordered sequence of 3D points
pub type Streamline = Vec<[f64; 3]>;

/// Parameters for [`LocalTracking`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// Step length in mm
    pub step_size: f64,
    /// Largest turn between consecutive steps, degrees
    pub max_angle: f64,
    /// Maximum points per half-streamline, seed included
    pub max_length: usize,
    /// Maximum initial directions followed per seed (all when `None`)
    pub max_cross: Option<usize>,
    /// Also keep streamlines that did not end on a valid endpoint
    pub return_all: bool,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            step_size: 0.5,
            max_angle: 60.0,
            max_length: 500,
            max_cross: None,
            return_all: true,
        }
    }
}

/// Deterministic local tracker
pub struct LocalTracking<'a> {
    direction_getter: &'a dyn DirectionGetter,
    stopping_criterion: &'a dyn StoppingCriterion,
    affine: Affine,
    inv_affine: Affine,
    /// Step in voxel units along each axis
    voxel_step: [f64; 3],
    params: TrackingParams,
}

impl<'a> LocalTracking<'a> {
    pub fn new(
        direction_getter: &'a dyn DirectionGetter,
        stopping_criterion: &'a dyn StoppingCriterion,
        affine: &Affine,
        params: TrackingParams,
    ) -> Result<Self> {
        if !(params.step_size > 0.0) {
            return Err(Error::invalid(format!("step size must be positive, got {}", params.step_size)));
        }
        if params.max_length == 0 {
            return Err(Error::invalid("max_length must be at least 1"));
        }
        if params.max_cross == Some(0) {
            return Err(Error::invalid("max_cross must be at least 1 when set"));
        }
        let inv_affine = affine.inverse()?;
        let vs = affine.voxel_sizes();
        let voxel_step = [params.step_size / vs[0], params.step_size / vs[1], params.step_size / vs[2]];

        Ok(Self {
            direction_getter,
            stopping_criterion,
            affine: *affine,
            inv_affine,
            voxel_step,
            params,
        })
    }

    /// Trace every seed, returning world-space (RAS-mm) streamlines in seed order
    pub fn generate(&self, seeds: &[[f64; 3]]) -> Vec<Streamline> {
        let start = Instant::now();
        let per_seed: Vec<Vec<Streamline>> = seeds.par_iter().map(|&s| self.track_seed(s)).collect();

        let streamlines: Vec<Streamline> = per_seed
            .into_iter()
            .flatten()
            .map(|line| line.into_iter().map(|p| self.affine.apply(p)).collect())
            .collect();

        let points: usize = streamlines.iter().map(Vec::len).sum();
        info!(
            "Tracked {} streamlines from {} seeds in {:.2?}",
            streamlines.len(),
            seeds.len(),
            start.elapsed()
        );
        debug!("{} points, step {} mm", points, self.params.step_size);
        streamlines
    }

    /// Streamlines in voxel coordinates for one world-space seed
    pub fn track_seed(&self, seed_world: [f64; 3]) -> Vec<Streamline> {
        let seed = self.inv_affine.apply(seed_world);
        let single = || if self.params.return_all { vec![vec![seed]] } else { Vec::new() };

        if self.stopping_criterion.check_point(seed) != StreamlineStatus::TrackPoint {
            return single();
        }

        let mut directions = self.direction_getter.initial_directions(seed);
        if let Some(max_cross) = self.params.max_cross {
            directions.truncate(max_cross);
        }
        if directions.is_empty() {
            return single();
        }

        let mut out = Vec::with_capacity(directions.len());
        for d in directions {
            let (forward, fwd_status) = self.propagate(seed, d);
            let (backward, bwd_status) = self.propagate(seed, [-d[0], -d[1], -d[2]]);

            let valid_end = |s: StreamlineStatus| {
                matches!(s, StreamlineStatus::Endpoint | StreamlineStatus::OutsideImage)
            };
            if !self.params.return_all && !(valid_end(fwd_status) && valid_end(bwd_status)) {
                continue;
            }

            let mut line = Vec::with_capacity(backward.len() + forward.len() + 1);
            line.extend(backward.into_iter().rev());
            line.push(seed);
            line.extend(forward);
            out.push(line);
        }
        out
    }

    /// Follow directions from `start` (not included in the result)
    fn propagate(&self, start: [f64; 3], direction: [f64; 3]) -> (Streamline, StreamlineStatus) {
        let mut points = Vec::new();
        let mut point = start;
        let mut direction = direction;
        let mut status = StreamlineStatus::TrackPoint;

        while points.len() + 1 < self.params.max_length {
            direction = match self.direction_getter.next_direction(point, direction) {
                Some(d) => d,
                None => break,
            };
            for a in 0..3 {
                point[a] += direction[a] * self.voxel_step[a];
            }

            status = self.stopping_criterion.check_point(point);
            match status {
                StreamlineStatus::TrackPoint => points.push(point),
                StreamlineStatus::Endpoint | StreamlineStatus::InvalidPoint => {
                    points.push(point);
                    break;
                }
                StreamlineStatus::OutsideImage => break,
            }
        }
        (points, status)
    }
}
