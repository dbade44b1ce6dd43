//! Deterministic tractography on one subject of a BIDS dataset
//!
//! Usage: cargo run --release --example deterministic_tracking -- <bids_root> <subject> [session] [config.json]
//!
//! Set `RUST_LOG=info` to follow the pipeline stages.

use std::path::Path;
use std::time::Instant;

use dmri_core::config::PipelineConfig;
use dmri_core::dataset::BidsLayout;
use dmri_core::pipeline::run;

fn main() -> Result<(), String> {
    env_logger::init();
    let total_start = Instant::now();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 4 {
        return Err("usage: deterministic_tracking <bids_root> <subject> [session] [config.json]".to_string());
    }
    let root = Path::new(&args[0]);
    let subject = args[1].as_str();
    let session = args.get(2).map(String::as_str).filter(|s| !s.is_empty() && *s != "-");

    let config = match args.get(3) {
        Some(path) => PipelineConfig::from_json_file(Path::new(path)).map_err(|e| format!("Bad config: {e}"))?,
        None => PipelineConfig::default(),
    };
    println!(
        "[INFO] step {} mm, max angle {} deg, FA stop {}, FA seed {}",
        config.tracking.step_size, config.tracking.max_angle, config.stopping.fa_threshold, config.seeding.fa_threshold
    );

    let layout = BidsLayout::new(root).map_err(|e| e.to_string())?;
    let outputs = run(&layout, subject, session, &config).map_err(|e| e.to_string())?;

    for (label, path) in [("Mask", &outputs.mask), ("FA", &outputs.fa), ("Response", &outputs.response)] {
        if let Some(path) = path {
            println!("[INFO] {}: {}", label, path.display());
        }
    }
    println!("[INFO] Tractogram: {} ({} streamlines)", outputs.tractogram.display(), outputs.n_streamlines);
    println!("[INFO] Total time: {:.2?}", total_start.elapsed());
    Ok(())
}
