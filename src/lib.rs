//! dmri-core: diffusion MRI tensor fitting and deterministic tractography
//!
//! A straight-line pipeline from a subject's diffusion series to a
//! streamline file.
//!
//! # Modules
//! - `dataset`: locating DWI files in a BIDS-like tree
//! - `nifti_io`, `gradients`: image and gradient table I/O
//! - `utils`: Otsu threshold, median filter, morphology, median-Otsu masking
//! - `dti`: tensor fitting, eigen-decomposition and scalar maps
//! - `response`: single-shell fiber response estimate
//! - `sphere`, `peaks`: discrete sphere and ODF peak extraction
//! - `tracking`: stopping criteria, seeding, direction getters, local tracking
//! - `tractogram`, `trk`: space-aware streamlines and TrackVis files
//! - `pipeline`, `config`: the end-to-end run and its parameters

// Core types
pub mod error;
pub mod space;
pub mod volume;

// I/O
pub mod dataset;
pub mod gradients;
pub mod nifti_io;

// Algorithms
pub mod dti;
pub mod peaks;
pub mod response;
pub mod sphere;
pub mod tracking;
pub mod utils;

// Streamline storage
pub mod tractogram;
pub mod trk;

// Orchestration
pub mod config;
pub mod pipeline;

pub use error::{Error, Result};
