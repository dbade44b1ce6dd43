//! Diffusion gradient tables
//!
//! Reads FSL-style `.bval` / `.bvec` text files and pairs each acquired
//! volume with its b-value and unit gradient direction.

use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Default b-value at or below which a volume counts as a b0
pub const DEFAULT_B0_THRESHOLD: f64 = 50.0;

/// Tolerance on the norm of non-b0 gradient directions
const UNIT_TOLERANCE: f64 = 1e-2;

/// Ordered (b-value, direction) pairs, one per volume
#[derive(Clone, Debug)]
pub struct GradientTable {
    pub bvals: Vec<f64>,
    pub bvecs: Vec<[f64; 3]>,
    pub b0_threshold: f64,
}

impl GradientTable {
    /// Build a table, normalizing the directions of diffusion-weighted volumes
    ///
    /// b0 volumes may carry a zero vector. Non-b0 directions must be unit
    /// length to within 1e-2 before normalization.
    pub fn new(bvals: Vec<f64>, bvecs: Vec<[f64; 3]>, b0_threshold: f64) -> Result<Self> {
        if bvals.len() != bvecs.len() {
            return Err(Error::shape_mismatch(
                format!("{} b-vectors", bvals.len()),
                format!("{} b-vectors", bvecs.len()),
            ));
        }
        if bvals.is_empty() {
            return Err(Error::invalid("gradient table is empty"));
        }

        let mut bvecs = bvecs;
        for (i, (b, v)) in bvals.iter().zip(bvecs.iter_mut()).enumerate() {
            if !b.is_finite() || *b < 0.0 {
                return Err(Error::invalid(format!("b-value {} at index {} is not a non-negative number", b, i)));
            }
            let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            if *b <= b0_threshold {
                continue;
            }
            if (norm - 1.0).abs() > UNIT_TOLERANCE {
                return Err(Error::invalid(format!(
                    "b-vector {} has norm {:.4}; diffusion-weighted directions must be unit vectors",
                    i, norm
                )));
            }
            for c in v.iter_mut() {
                *c /= norm;
            }
        }

        Ok(Self { bvals, bvecs, b0_threshold })
    }

    pub fn len(&self) -> usize {
        self.bvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvals.is_empty()
    }

    /// True for volumes with b <= b0_threshold
    pub fn b0s_mask(&self) -> Vec<bool> {
        self.bvals.iter().map(|&b| b <= self.b0_threshold).collect()
    }

    /// Indices of the b0 volumes
    pub fn b0_indices(&self) -> Vec<usize> {
        self.b0s_mask()
            .iter()
            .enumerate()
            .filter_map(|(i, &is_b0)| is_b0.then_some(i))
            .collect()
    }

    /// Check that the table matches the number of acquired volumes
    pub fn check_volumes(&self, nt: usize) -> Result<()> {
        if self.len() != nt {
            return Err(Error::shape_mismatch(
                format!("{} gradient entries", nt),
                format!("{} gradient entries", self.len()),
            ));
        }
        Ok(())
    }
}

fn parse_numbers(text: &str, path: &Path) -> Result<Vec<Vec<f64>>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|tok| !tok.is_empty())
                .map(|tok| {
                    tok.parse::<f64>().map_err(|_| {
                        Error::Format(format!("{}: '{}' is not a number", path.display(), tok))
                    })
                })
                .collect()
        })
        .collect()
}

fn read_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::FileNotFound { path: path.to_path_buf() });
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Read b-values (one or more whitespace-separated rows)
pub fn read_bvals(path: &Path) -> Result<Vec<f64>> {
    let rows = parse_numbers(&read_text(path)?, path)?;
    Ok(rows.into_iter().flatten().collect())
}

/// Read b-vectors stored as 3 rows of N values, or N rows of 3 values
pub fn read_bvecs(path: &Path) -> Result<Vec<[f64; 3]>> {
    let rows = parse_numbers(&read_text(path)?, path)?;

    if rows.len() == 3 && rows.iter().all(|r| r.len() == rows[0].len()) {
        let n = rows[0].len();
        return Ok((0..n).map(|i| [rows[0][i], rows[1][i], rows[2][i]]).collect());
    }
    if rows.iter().all(|r| r.len() == 3) {
        return Ok(rows.into_iter().map(|r| [r[0], r[1], r[2]]).collect());
    }

    Err(Error::Format(format!(
        "{}: b-vectors must be 3xN or Nx3, got {} rows",
        path.display(),
        rows.len()
    )))
}

/// Read a `.bval` / `.bvec` pair into a gradient table
pub fn read_bvals_bvecs(bval_path: &Path, bvec_path: &Path, b0_threshold: f64) -> Result<GradientTable> {
    let bvals = read_bvals(bval_path)?;
    let bvecs = read_bvecs(bvec_path)?;
    debug!("Read {} b-values and {} b-vectors", bvals.len(), bvecs.len());
    GradientTable::new(bvals, bvecs, b0_threshold)
}

/// Write a gradient table as FSL-style `.bval` / `.bvec` files
pub fn write_bvals_bvecs(gtab: &GradientTable, bval_path: &Path, bvec_path: &Path) -> Result<()> {
    let bvals: Vec<String> = gtab.bvals.iter().map(|b| format!("{}", b)).collect();
    std::fs::write(bval_path, bvals.join(" ") + "\n")?;

    let rows: Vec<String> = (0..3)
        .map(|c| {
            gtab.bvecs.iter().map(|v| format!("{:.8}", v[c])).collect::<Vec<_>>().join(" ")
        })
        .collect();
    std::fs::write(bvec_path, rows.join("\n") + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("dmri_grad_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_length_mismatch() {
        let result = GradientTable::new(vec![0.0, 1000.0], vec![[0.0; 3]], DEFAULT_B0_THRESHOLD);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_normalizes_and_flags_b0() {
        let gtab = GradientTable::new(
            vec![0.0, 5.0, 1000.0],
            vec![[0.0; 3], [0.0; 3], [1.005, 0.0, 0.0]],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap();
        assert_eq!(gtab.b0s_mask(), vec![true, true, false]);
        assert_eq!(gtab.b0_indices(), vec![0, 1]);
        assert!((gtab.bvecs[2][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_unit_direction() {
        let result = GradientTable::new(vec![1000.0], vec![[0.5, 0.0, 0.0]], DEFAULT_B0_THRESHOLD);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_read_bvecs_both_layouts() {
        let rows = tmp_path("rows.bvec");
        std::fs::write(&rows, "0 1 0 0\n0 0 1 0\n0 0 0 1\n").unwrap();
        let cols = tmp_path("cols.bvec");
        std::fs::write(&cols, "0 0 0\n1 0 0\n0 1 0\n0 0 1\n").unwrap();

        let a = read_bvecs(&rows).unwrap();
        let b = read_bvecs(&cols).unwrap();
        assert_eq!(a, vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        assert_eq!(a, b);

        std::fs::remove_file(&rows).ok();
        std::fs::remove_file(&cols).ok();
    }

    #[test]
    fn test_write_then_read() {
        let gtab = GradientTable::new(
            vec![0.0, 1000.0, 1000.0],
            vec![[0.0; 3], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap();
        let bval = tmp_path("t.bval");
        let bvec = tmp_path("t.bvec");
        write_bvals_bvecs(&gtab, &bval, &bvec).unwrap();

        let back = read_bvals_bvecs(&bval, &bvec, DEFAULT_B0_THRESHOLD).unwrap();
        assert_eq!(back.bvals, gtab.bvals);
        assert_eq!(back.bvecs, gtab.bvecs);

        std::fs::remove_file(&bval).ok();
        std::fs::remove_file(&bvec).ok();
    }

    #[test]
    fn test_bad_number() {
        let path = tmp_path("bad.bval");
        std::fs::write(&path, "0 1000 abc\n").unwrap();
        assert!(matches!(read_bvals(&path), Err(Error::Format(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file() {
        let result = read_bvals(Path::new("/nonexistent/sub-01_dwi.bval"));
        assert!(matches!(result, Err(Error::FileNotFound { .. })));
    }
}
