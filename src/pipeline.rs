//! Deterministic tractography pipeline
//!
//! Masking, tensor fit, FA, response estimate, peaks, seeding, tracking and
//! serialization, run in that order. [`run_tracking`] works on in-memory
//! data; [`run`] adds dataset lookup and writes derivatives to disk.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::dataset::BidsLayout;
use crate::dti::{fa_map, TensorFit, TensorModel};
use crate::error::{Error, Result};
use crate::gradients::{read_bvals_bvecs, GradientTable};
use crate::nifti_io::{read_nifti_file, save_nifti_to_file, NiftiData};
use crate::peaks::{peaks_from_model, PeaksField};
use crate::response::{auto_response_ssst, save_response, ResponseFunction};
use crate::space::{Affine, Space};
use crate::sphere::Sphere;
use crate::tracking::{seeds_from_mask, LocalTracking, PeaksDirectionGetter, ThresholdStoppingCriterion};
use crate::tractogram::{SpatialReference, StatefulTractogram};
use crate::trk::save_trk;
use crate::utils::{count_nonzero, median_otsu};
use crate::volume::ScalarVolume;

/// Everything the in-memory pipeline produces
#[derive(Debug)]
pub struct TrackingResult {
    pub mask: Vec<u8>,
    pub fit: TensorFit,
    /// Sanitized FA, zero outside the mask
    pub fa: Vec<f64>,
    pub peaks: PeaksField,
    pub response: Option<ResponseFunction>,
    pub n_seeds: usize,
    pub tractogram: StatefulTractogram,
}

/// Paths written by [`run`]
#[derive(Clone, Debug)]
pub struct PipelineOutputs {
    pub mask: Option<PathBuf>,
    pub fa: Option<PathBuf>,
    pub response: Option<PathBuf>,
    pub tractogram: PathBuf,
    pub n_streamlines: usize,
}

/// Run every stage on a loaded series
///
/// # Arguments
/// * `dwi` - 4D diffusion series with its affine
/// * `gtab` - Gradient table, one entry per volume
/// * `config` - Stage parameters
pub fn run_tracking(dwi: &NiftiData, gtab: &GradientTable, config: &PipelineConfig) -> Result<TrackingResult> {
    config.validate()?;
    gtab.check_volumes(dwi.nt)?;
    let dims = dwi.dims;
    let n = dims.0 * dims.1 * dims.2;

    info!("[STEP 1] Brain masking (median-Otsu)...");
    let start = Instant::now();
    let (masked, mask) = median_otsu(&dwi.data, dims, dwi.nt, &config.masking)?;
    let n_mask = count_nonzero(&mask);
    info!("Mask: {} of {} voxels ({:.1}%) in {:.2?}", n_mask, n, 100.0 * n_mask as f64 / n as f64, start.elapsed());
    if n_mask == 0 {
        return Err(Error::invalid("brain mask is empty"));
    }

    info!("[STEP 2] Tensor fit...");
    let model = TensorModel::new(gtab, config.tensor.clone())?;
    let fit = model.fit(&masked, dims, Some(&mask))?;

    info!("[STEP 3] Scalar maps...");
    let mut fa = fa_map(&fit);
    for (v, &m) in fa.iter_mut().zip(&mask) {
        if m == 0 {
            *v = 0.0;
        }
    }

    let response = if config.output.estimate_response {
        info!("[STEP 4] Response function...");
        match auto_response_ssst(gtab, &masked, dims, &config.response, &config.tensor) {
            Ok(r) => Some(r),
            Err(Error::InvalidInput(msg)) => {
                warn!("Skipping response estimate: {}", msg);
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    info!("[STEP 5] Peak extraction...");
    let sphere = Sphere::geodesic(config.peaks.sphere_frequency)?;
    let peaks = peaks_from_model(&fit, &sphere, &config.peaks, Some(&mask))?;

    info!("[STEP 6] Seeding...");
    let seed_mask: Vec<u8> = fa
        .iter()
        .zip(&mask)
        .map(|(&f, &m)| u8::from(m != 0 && f > config.seeding.fa_threshold))
        .collect();
    let seeds = seeds_from_mask(&seed_mask, dims, &dwi.affine, config.seeding.density)?;
    info!("{} seeds from {} voxels with FA > {}", seeds.len(), count_nonzero(&seed_mask), config.seeding.fa_threshold);

    info!("[STEP 7] Tracking...");
    let stopping = ThresholdStoppingCriterion::new(ScalarVolume::new(fa.clone(), dims)?, config.stopping.fa_threshold);
    let direction_getter = PeaksDirectionGetter::new(&peaks, config.tracking.max_angle);
    let tracker = LocalTracking::new(&direction_getter, &stopping, &dwi.affine, config.tracking.clone())?;
    let streamlines = tracker.generate(&seeds);

    let reference = SpatialReference::new(dwi.affine, dims);
    let mut tractogram = StatefulTractogram::new(streamlines, reference, Space::RasMm)?;
    if config.output.remove_invalid {
        tractogram.remove_invalid_streamlines();
    }
    tractogram.to_space(config.output.space);

    Ok(TrackingResult {
        mask,
        fit,
        fa,
        peaks,
        response,
        n_seeds: seeds.len(),
        tractogram,
    })
}

fn write_volume(path: &Path, data: &[f64], dims: (usize, usize, usize), affine: &Affine) -> Result<()> {
    save_nifti_to_file(path, data, dims, 1, affine)?;
    info!("Saved {}", path.display());
    Ok(())
}

/// Locate a subject's DWI, run the pipeline and write derivatives
///
/// Outputs go to `<root>/derivatives/<pipeline_name>/sub-<s>[/ses-<t>]/dwi/`.
pub fn run(layout: &BidsLayout, subject: &str, session: Option<&str>, config: &PipelineConfig) -> Result<PipelineOutputs> {
    let total_start = Instant::now();

    info!("Loading diffusion data for sub-{}...", subject.trim_start_matches("sub-"));
    let start = Instant::now();
    let files = layout.dwi_files(subject, session)?;
    let dwi = read_nifti_file(&files.dwi)?;
    let gtab = read_bvals_bvecs(&files.bval, &files.bvec, config.b0_threshold)?;
    let (nx, ny, nz) = dwi.dims;
    info!(
        "Loaded {}x{}x{}x{} series, {} b0 volumes, in {:.2?}",
        nx,
        ny,
        nz,
        dwi.nt,
        gtab.b0_indices().len(),
        start.elapsed()
    );

    let result = run_tracking(&dwi, &gtab, config)?;

    let out_dir = layout.derivatives_dir(&config.output.pipeline_name, subject, session)?;
    let prefix = BidsLayout::output_prefix(subject, session);
    let out = |suffix: &str| out_dir.join(format!("{}_{}", prefix, suffix));

    let mask = if config.output.write_mask {
        let path = out("desc-brain_mask.nii.gz");
        let data: Vec<f64> = result.mask.iter().map(|&m| f64::from(m)).collect();
        write_volume(&path, &data, dwi.dims, &dwi.affine)?;
        Some(path)
    } else {
        None
    };

    let fa = if config.output.write_fa {
        let path = out("model-DTI_FA.nii.gz");
        write_volume(&path, &result.fa, dwi.dims, &dwi.affine)?;
        Some(path)
    } else {
        None
    };

    let response = match (&result.response, config.output.write_response) {
        (Some(r), true) => {
            let path = out("desc-ssst_response.txt");
            save_response(&path, r)?;
            info!("Saved {}", path.display());
            Some(path)
        }
        _ => None,
    };

    let tractogram = out("tractography-deterministic_tractogram.trk");
    save_trk(&tractogram, &result.tractogram)?;

    info!("Pipeline finished in {:.2?}", total_start.elapsed());
    Ok(PipelineOutputs {
        mask,
        fa,
        response,
        tractogram,
        n_streamlines: result.tractogram.len(),
    })
}
