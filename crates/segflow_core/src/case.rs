//! Grouping of NIfTI files into cases.
//!
//! A case is identified by the common stem of its channel files:
//! `<id>_<NNNN>.nii[.gz]` for multi-channel inputs, or a bare `<id>.nii[.gz]`.

use crate::constants::files;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static CHANNEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<id>.+)_(?P<ch>\d{4})\.nii(\.gz)?$").expect("valid channel pattern")
});

/// Supported image file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Nifti,
    NiftiGz,
}

impl ImageFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".nii.gz") {
            Some(Self::NiftiGz)
        } else if lower.ends_with(".nii") {
            Some(Self::Nifti)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::from_name)
    }

    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Nifti => ".nii",
            Self::NiftiGz => ".nii.gz",
        }
    }

    fn strip<'a>(self, name: &'a str) -> &'a str {
        &name[..name.len() - self.extension().len()]
    }
}

/// One segmentation unit: an identifier and its channel files in channel order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub files: Vec<PathBuf>,
}

impl Case {
    /// Channel files paired with their canonical staged names (`case_0000.nii.gz`, ...).
    pub fn staged_names(&self) -> Vec<(&Path, String)> {
        self.files
            .iter()
            .enumerate()
            .map(|(channel, file)| {
                let format = ImageFormat::from_path(file).unwrap_or(ImageFormat::Nifti);
                (file.as_path(), staged_name(channel, format))
            })
            .collect()
    }
}

/// Canonical name of a staged channel file.
pub fn staged_name(channel: usize, format: ImageFormat) -> String {
    format!(
        "{}_{channel:04}{}",
        files::STAGED_CASE_STEM,
        format.extension()
    )
}

/// Scans `dir` (non-recursively) and groups its images into cases.
///
/// Cases are ordered by id and files within a case lexicographically, which
/// fixes the channel order. A directory without images yields an empty list.
pub fn collect_cases(dir: &Path) -> io::Result<Vec<Case>> {
    let mut buckets: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            debug!("Skipping non UTF-8 file name {:?}", file_name);
            continue;
        };
        let Some(format) = ImageFormat::from_name(name) else {
            continue;
        };

        let id = match CHANNEL_PATTERN.captures(name) {
            Some(caps) => caps["id"].to_string(),
            None => format.strip(name).to_string(),
        };

        buckets.entry(id).or_default().push(entry.path());
    }

    Ok(buckets
        .into_iter()
        .map(|(id, mut files)| {
            files.sort();
            Case { id, files }
        })
        .collect())
}

/// The first image file in `dir`, in lexicographic order.
pub fn first_image(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && ImageFormat::from_path(&entry.path()).is_some() {
            images.push(entry.path());
        }
    }
    images.sort();
    Ok(images.into_iter().next())
}

/// Copies a predicted image to `<output_dir>/<case_id><ext>`, keeping its extension.
///
/// The copy is written under a temporary name and renamed into place, so a
/// partial file never carries the final name.
pub fn place_result(artifact: &Path, output_dir: &Path, case_id: &str) -> io::Result<PathBuf> {
    let format = ImageFormat::from_path(artifact).unwrap_or(ImageFormat::NiftiGz);
    let destination = output_dir.join(format!("{case_id}{}", format.extension()));
    let partial = output_dir.join(format!(".{case_id}{}.partial", format.extension()));

    std::fs::create_dir_all(output_dir)?;
    std::fs::copy(artifact, &partial)?;
    if let Err(e) = std::fs::rename(&partial, &destination) {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }
    Ok(destination)
}
