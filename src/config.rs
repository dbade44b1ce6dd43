//! Pipeline configuration
//!
//! Every section has defaults, so a JSON file only needs the keys it
//! changes:
//!
//! ```json
//! { "stopping": { "fa_threshold": 0.25 }, "tracking": { "step_size": 1.0 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dti::TensorModelParams;
use crate::error::{Error, Result};
use crate::gradients::DEFAULT_B0_THRESHOLD;
use crate::peaks::PeaksParams;
use crate::response::ResponseParams;
use crate::space::Space;
use crate::tracking::TrackingParams;
use crate::utils::MedianOtsuParams;

/// FA threshold used by the stopping criterion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingConfig {
    pub fa_threshold: f64,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self { fa_threshold: 0.2 }
    }
}

/// Seed region (FA above a threshold, inside the brain mask) and density
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedingConfig {
    pub fa_threshold: f64,
    /// Seeds per voxel along each axis
    pub density: [usize; 3],
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self { fa_threshold: 0.3, density: [1, 1, 1] }
    }
}

/// What gets written and where
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Name of the folder under `<root>/derivatives/`
    pub pipeline_name: String,
    /// Space the tractogram is declared in before saving
    pub space: Space,
    pub write_fa: bool,
    pub write_mask: bool,
    pub write_response: bool,
    /// Estimate the response from the data (needed for `write_response`)
    pub estimate_response: bool,
    /// Drop streamlines leaving the reference volume before saving
    pub remove_invalid: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "dmri_core".to_string(),
            space: Space::RasMm,
            write_fa: true,
            write_mask: true,
            write_response: true,
            estimate_response: true,
            remove_invalid: true,
        }
    }
}

/// Parameters of every pipeline stage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// b-values at or below this count as b0
    pub b0_threshold: f64,
    pub masking: MedianOtsuParams,
    pub tensor: TensorModelParams,
    pub peaks: PeaksParams,
    pub stopping: StoppingConfig,
    pub seeding: SeedingConfig,
    pub tracking: TrackingParams,
    pub response: ResponseParams,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            b0_threshold: DEFAULT_B0_THRESHOLD,
            masking: MedianOtsuParams::default(),
            tensor: TensorModelParams::default(),
            peaks: PeaksParams::default(),
            stopping: StoppingConfig::default(),
            seeding: SeedingConfig::default(),
            tracking: TrackingParams::default(),
            response: ResponseParams::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse from JSON text; missing keys take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound { path: path.to_path_buf() });
        }
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check value ranges across sections
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::invalid(format!("{} must be in [0, 1], got {}", name, v)));
            }
            Ok(())
        };

        if !(self.b0_threshold >= 0.0) {
            return Err(Error::invalid(format!("b0_threshold must be non-negative, got {}", self.b0_threshold)));
        }
        if self.masking.vol_idx.is_empty() {
            return Err(Error::invalid("masking.vol_idx must name at least one volume"));
        }
        if !(self.tensor.min_signal > 0.0) {
            return Err(Error::invalid("tensor.min_signal must be positive"));
        }

        unit("peaks.relative_peak_threshold", self.peaks.relative_peak_threshold)?;
        if !(0.0..=90.0).contains(&self.peaks.min_separation_angle) {
            return Err(Error::invalid("peaks.min_separation_angle must be in [0, 90]"));
        }
        if self.peaks.npeaks == 0 {
            return Err(Error::invalid("peaks.npeaks must be at least 1"));
        }
        if self.peaks.sphere_frequency == 0 {
            return Err(Error::invalid("peaks.sphere_frequency must be at least 1"));
        }

        unit("stopping.fa_threshold", self.stopping.fa_threshold)?;
        unit("seeding.fa_threshold", self.seeding.fa_threshold)?;
        if self.seeding.density.iter().any(|&d| d == 0) {
            return Err(Error::invalid("seeding.density must be positive on every axis"));
        }

        if !(self.tracking.step_size > 0.0) {
            return Err(Error::invalid(format!("tracking.step_size must be positive, got {}", self.tracking.step_size)));
        }
        if !(self.tracking.max_angle > 0.0 && self.tracking.max_angle <= 90.0) {
            return Err(Error::invalid("tracking.max_angle must be in (0, 90]"));
        }
        if self.tracking.max_length == 0 {
            return Err(Error::invalid("tracking.max_length must be at least 1"));
        }
        if self.tracking.max_cross == Some(0) {
            return Err(Error::invalid("tracking.max_cross must be at least 1 when set"));
        }

        unit("response.fa_threshold", self.response.fa_threshold)?;
        if self.output.write_response && !self.output.estimate_response {
            return Err(Error::invalid("output.write_response needs output.estimate_response"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dti::FitMethod;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.b0_threshold, 50.0);
        assert_eq!(config.masking.median_radius, 4);
        assert_eq!(config.masking.numpass, 4);
        assert_eq!(config.tensor.fit_method, FitMethod::Wls);
        assert_eq!(config.peaks.sphere_frequency, 6);
        assert_eq!(config.peaks.npeaks, 2);
        assert_eq!(config.stopping.fa_threshold, 0.2);
        assert_eq!(config.seeding.fa_threshold, 0.3);
        assert_eq!(config.tracking.step_size, 0.5);
        assert_eq!(config.tracking.max_angle, 60.0);
        assert_eq!(config.output.space, Space::RasMm);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json(
            r#"{ "tensor": { "fit_method": "ols" }, "tracking": { "step_size": 1.0 }, "output": { "space": "vox" } }"#,
        )
        .unwrap();
        assert_eq!(config.tensor.fit_method, FitMethod::Ols);
        assert_eq!(config.tracking.step_size, 1.0);
        assert_eq!(config.tracking.max_length, 500);
        assert_eq!(config.output.space, Space::Vox);
        assert_eq!(config.b0_threshold, 50.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = PipelineConfig::default();
        let back = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "tracking": { "step_size": 0.0 } }"#),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "seeding": { "density": [1, 0, 1] } }"#),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "stopping": { "fa_threshold": 1.5 } }"#),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(PipelineConfig::from_json("{ not json"), Err(Error::Config(_))));
    }
}
