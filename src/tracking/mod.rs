//! Deterministic streamline tractography
//!
//! - `stopping`: per-point stopping criteria
//! - `seeds`: seed placement from masks
//! - `direction`: direction getters over peak fields
//! - `local`: forward/backward local tracking

pub mod direction;
pub mod local;
pub mod seeds;
pub mod stopping;

pub use direction::{DirectionGetter, PeaksDirectionGetter};
pub use local::{LocalTracking, Streamline, TrackingParams};
pub use seeds::seeds_from_mask;
pub use stopping::{BinaryStoppingCriterion, StoppingCriterion, StreamlineStatus, ThresholdStoppingCriterion};
