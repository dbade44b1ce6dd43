//! Locating one subject's diffusion files in a BIDS-like tree
//!
//! Expected layout:
//! `<root>/sub-<label>[/ses-<label>]/dwi/sub-<label>[_ses-<label>][_<entities>]_dwi.nii[.gz]`
//! with `.bval` and `.bvec` files sharing the image's stem.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// Paths of a diffusion acquisition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DwiFiles {
    pub dwi: PathBuf,
    pub bval: PathBuf,
    pub bvec: PathBuf,
}

/// A dataset root following the subject/session/modality convention
#[derive(Clone, Debug)]
pub struct BidsLayout {
    root: PathBuf,
}

fn strip_prefix<'a>(label: &'a str, prefix: &str) -> &'a str {
    label.strip_prefix(prefix).unwrap_or(label)
}

/// Stem of a NIfTI filename without `.nii` / `.nii.gz`
fn nifti_stem(name: &str) -> Option<&str> {
    name.strip_suffix(".nii.gz").or_else(|| name.strip_suffix(".nii"))
}

impl BidsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::FileNotFound { path: root });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a modality (`dwi`, `anat`, ...) for a subject/session
    pub fn modality_dir(&self, subject: &str, session: Option<&str>, modality: &str) -> PathBuf {
        let subject = strip_prefix(subject, "sub-");
        let mut dir = self.root.join(format!("sub-{}", subject));
        if let Some(ses) = session {
            dir = dir.join(format!("ses-{}", strip_prefix(ses, "ses-")));
        }
        dir.join(modality)
    }

    /// Filename prefix shared by every file of a subject/session
    fn file_prefix(subject: &str, session: Option<&str>) -> String {
        let mut prefix = format!("sub-{}", strip_prefix(subject, "sub-"));
        if let Some(ses) = session {
            prefix.push_str(&format!("_ses-{}", strip_prefix(ses, "ses-")));
        }
        prefix
    }

    /// Find the first NIfTI image in a modality folder ending with `_<suffix>`
    ///
    /// Candidates are sorted by filename so the result is deterministic.
    pub fn find_image(&self, subject: &str, session: Option<&str>, modality: &str, suffix: &str) -> Result<PathBuf> {
        let dir = self.modality_dir(subject, session, modality);
        if !dir.is_dir() {
            return Err(Error::FileNotFound { path: dir });
        }

        let prefix = Self::file_prefix(subject, session);
        let wanted = format!("_{}", suffix);

        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(nifti_stem)
                    .map(|stem| {
                        let entities = stem.strip_prefix(prefix.as_str()).unwrap_or_default();
                        entities.starts_with('_') && stem.ends_with(&wanted)
                    })
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        candidates.into_iter().next().ok_or_else(|| Error::FileNotFound {
            path: dir.join(format!("{}*{}.nii.gz", prefix, wanted)),
        })
    }

    /// Resolve the diffusion image and its gradient files
    pub fn dwi_files(&self, subject: &str, session: Option<&str>) -> Result<DwiFiles> {
        let dwi = self.find_image(subject, session, "dwi", "dwi")?;

        let name = dwi.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let stem = nifti_stem(name).unwrap_or(name).to_string();
        let dir = dwi.parent().map(Path::to_path_buf).unwrap_or_default();

        let bval = dir.join(format!("{}.bval", stem));
        let bvec = dir.join(format!("{}.bvec", stem));
        for path in [&bval, &bvec] {
            if !path.is_file() {
                return Err(Error::FileNotFound { path: path.clone() });
            }
        }

        debug!("Resolved DWI for sub-{}: {}", strip_prefix(subject, "sub-"), dwi.display());
        Ok(DwiFiles { dwi, bval, bvec })
    }

    /// Resolve the T1-weighted anatomical reference
    pub fn t1w(&self, subject: &str, session: Option<&str>) -> Result<PathBuf> {
        self.find_image(subject, session, "anat", "T1w")
    }

    /// Output directory for derivatives of a pipeline, created on demand
    pub fn derivatives_dir(&self, pipeline: &str, subject: &str, session: Option<&str>) -> Result<PathBuf> {
        let sub_root = BidsLayout { root: self.root.join("derivatives").join(pipeline) };
        let dir = sub_root.modality_dir(subject, session, "dwi");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Filename prefix for derivative outputs, e.g. `sub-01_ses-01`
    pub fn output_prefix(subject: &str, session: Option<&str>) -> String {
        Self::file_prefix(subject, session)
    }
}
