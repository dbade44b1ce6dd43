//! End-to-end runs on a synthetic single-fiber phantom

mod common;

use common::{fa08_tensor, overlap, scratch_dir, Phantom};
use dmri_core::config::PipelineConfig;
use dmri_core::dataset::BidsLayout;
use dmri_core::nifti_io::{read_nifti_file, NiftiData};
use dmri_core::pipeline::{run, run_tracking};
use dmri_core::response::load_response;
use dmri_core::space::Space;
use dmri_core::trk::load_trk;
use dmri_core::Error;

fn small_phantom_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    // Large median windows erase a 12-voxel phantom
    config.masking.median_radius = 1;
    config.masking.numpass = 1;
    config
}

fn as_nifti(phantom: &Phantom) -> NiftiData {
    NiftiData {
        data: phantom.data.clone(),
        dims: phantom.dims,
        nt: phantom.gtab.len(),
        voxel_size: (2.0, 2.0, 2.0),
        affine: phantom.affine,
        scl_slope: 1.0,
        scl_inter: 0.0,
    }
}

#[test]
fn test_run_tracking_on_phantom() {
    let phantom = Phantom::ball(12, 4.5);
    let dwi = as_nifti(&phantom);
    let result = run_tracking(&dwi, &phantom.gtab, &small_phantom_config()).unwrap();

    assert!(overlap(&phantom.tissue, &result.mask) > 0.9);
    assert!(overlap(&result.mask, &phantom.tissue) > 0.9);

    let inside: Vec<usize> = (0..phantom.n_voxels())
        .filter(|&v| phantom.tissue[v] != 0 && result.mask[v] != 0)
        .collect();
    assert!(!inside.is_empty());
    for &v in &inside {
        assert!((result.fa[v] - 0.8).abs() < 1e-4, "FA {} at voxel {}", result.fa[v], v);
        assert_eq!(result.peaks.count(v), 1);
        assert!(result.peaks.directions(v)[0][0].abs() > 0.999);
    }
    assert!(result.fa.iter().all(|v| (0.0..=1.0).contains(v)));

    let response = result.response.expect("response estimated");
    let expected = fa08_tensor().evals;
    assert!(response.count > 0);
    assert!((response.evals[0] - expected[0]).abs() < 1e-3 * expected[0]);
    assert!((response.evals[1] - expected[1]).abs() < 1e-3 * expected[1]);
    assert!((response.s0 - phantom.s0).abs() < 1e-6 * phantom.s0);

    assert!(result.n_seeds > 0);
    assert_eq!(result.tractogram.len(), result.n_seeds);
    assert_eq!(result.tractogram.space(), Space::RasMm);

    // Fibers run along x, so world y and z stay fixed along each streamline
    for line in &result.tractogram.streamlines {
        for p in line {
            assert!((p[1] - line[0][1]).abs() < 1e-9);
            assert!((p[2] - line[0][2]).abs() < 1e-9);
        }
    }
    let c = phantom.voxel(6, 6, 6);
    assert!(result.mask[c] != 0);
    assert!(result.tractogram.lengths().iter().any(|&l| l > 10.0));
}

#[test]
fn test_run_tracking_rejects_volume_count_mismatch() {
    let phantom = Phantom::ball(8, 3.0);
    let mut dwi = as_nifti(&phantom);
    dwi.nt -= 1;
    dwi.data.truncate(dwi.nt * phantom.n_voxels());
    assert!(run_tracking(&dwi, &phantom.gtab, &small_phantom_config()).is_err());
}

#[test]
fn test_run_writes_derivatives() {
    let root = scratch_dir("pipeline_run");
    let phantom = Phantom::ball(12, 4.5);
    phantom.write_bids(&root, "01");

    let layout = BidsLayout::new(&root).unwrap();
    let outputs = run(&layout, "01", None, &small_phantom_config()).unwrap();

    let out_dir = root.join("derivatives").join("dmri_core").join("sub-01").join("dwi");
    assert_eq!(outputs.tractogram, out_dir.join("sub-01_tractography-deterministic_tractogram.trk"));
    assert!(outputs.n_streamlines > 0);

    let mask = read_nifti_file(outputs.mask.as_ref().unwrap()).unwrap();
    assert_eq!(mask.dims, phantom.dims);
    assert_eq!(mask.nt, 1);

    let fa = read_nifti_file(outputs.fa.as_ref().unwrap()).unwrap();
    let c = phantom.voxel(6, 6, 6);
    assert!((fa.data[c] - 0.8).abs() < 1e-3);
    for a in 0..16 {
        assert!((fa.affine.as_array()[a] - phantom.affine.as_array()[a]).abs() < 1e-5);
    }

    let response = load_response(outputs.response.as_ref().unwrap()).unwrap();
    assert!(response.count > 0);

    let trk = load_trk(&outputs.tractogram).unwrap();
    assert_eq!(trk.len(), outputs.n_streamlines);
    assert_eq!(trk.reference().dims, phantom.dims);
}

#[test]
fn test_run_missing_subject() {
    let root = scratch_dir("pipeline_missing");
    let layout = BidsLayout::new(&root).unwrap();
    let err = run(&layout, "99", None, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, Error::FileNotFound { .. }));
}
