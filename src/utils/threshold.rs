//! Automatic thresholding
//!
//! Otsu's method on a fixed-bin histogram. The returned threshold is a bin
//! center, and callers keep voxels strictly above it.

/// Otsu's method for automatic threshold selection
///
/// Builds a `num_bins` histogram over the full value range and returns the
/// center of the bin that maximizes the between-class variance. Non-finite
/// values are ignored.
///
/// # Arguments
/// * `data` - Input data (e.g. flattened 3D image)
/// * `num_bins` - Number of histogram bins (typically 256)
pub fn otsu_threshold(data: &[f64], num_bins: usize) -> f64 {
    let values: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() || num_bins == 0 {
        return 0.0;
    }

    let min_val = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if (max_val - min_val).abs() < 1e-12 {
        return min_val;
    }

    let bin_width = (max_val - min_val) / num_bins as f64;
    let mut histogram = vec![0.0f64; num_bins];
    for &v in &values {
        let bin = (((v - min_val) / bin_width) as usize).min(num_bins - 1);
        histogram[bin] += 1.0;
    }
    let centers: Vec<f64> = (0..num_bins)
        .map(|b| min_val + (b as f64 + 0.5) * bin_width)
        .collect();

    // Class weights and means for every split "bins[..=t] | bins[t+1..]"
    let total: f64 = histogram.iter().sum();
    let total_mass: f64 = histogram.iter().zip(&centers).map(|(h, c)| h * c).sum();

    let mut w_low = 0.0;
    let mut mass_low = 0.0;
    let mut best_var = f64::NEG_INFINITY;
    let mut best_bin = 0;

    for t in 0..num_bins - 1 {
        w_low += histogram[t];
        mass_low += histogram[t] * centers[t];
        let w_high = total - w_low;
        if w_low == 0.0 || w_high == 0.0 {
            continue;
        }
        let mean_low = mass_low / w_low;
        let mean_high = (total_mass - mass_low) / w_high;
        let var = w_low * w_high * (mean_low - mean_high).powi(2);
        if var > best_var {
            best_var = var;
            best_bin = t;
        }
    }

    centers[best_bin]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otsu_threshold_bimodal() {
        let mut data = Vec::new();
        for i in 0..100 {
            data.push(0.1 + 0.2 * (i as f64 / 100.0));
        }
        for i in 0..100 {
            data.push(0.7 + 0.2 * (i as f64 / 100.0));
        }

        let threshold = otsu_threshold(&data, 256);
        assert!(threshold > 0.25 && threshold < 0.7,
            "Threshold {} should separate the two clusters", threshold);
    }

    #[test]
    fn test_otsu_threshold_empty() {
        assert_eq!(otsu_threshold(&[], 256), 0.0);
    }

    #[test]
    fn test_otsu_threshold_constant() {
        assert_eq!(otsu_threshold(&[5.0; 100], 256), 5.0);
    }

    #[test]
    fn test_otsu_ignores_nan() {
        let mut data = vec![0.0; 50];
        data.extend(vec![10.0; 50]);
        data.push(f64::NAN);
        let t = otsu_threshold(&data, 16);
        assert!(t > 0.0 && t < 10.0);
    }
}
