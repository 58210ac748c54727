//! A stand-in for `nnUNetv2_predict` used when the real tool is unavailable.
//!
//! It prints progress in the same shape as the real tool (`NN%|####|`
//! redrawn with `\r`) and writes placeholder images, so the whole pipeline
//! can be exercised without a model.

use segflow_core::case::ImageFormat;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Content of every placeholder image.
pub const PLACEHOLDER_IMAGE: &[u8] = b"FAKE_NIFTI_DATA";

/// Name of the single artifact written for a staged case.
pub const CASE_ARTIFACT: &str = "prediction.nii.gz";

const CASE_STEPS: u32 = 20;
const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone)]
pub struct MockPredict {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Pause between two progress steps.
    pub step: Duration,
}

impl MockPredict {
    pub fn new(in_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            in_dir: in_dir.into(),
            out_dir: out_dir.into(),
            step: Duration::from_millis(50),
        }
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Simulates a prediction, writing progress to `progress`.
    ///
    /// Staged cases (inputs named `case_*`) yield one `prediction.nii.gz`;
    /// otherwise every input image yields `<stem>.nii.gz`.
    pub fn run<W: Write>(&self, progress: &mut W) -> io::Result<()> {
        fs::create_dir_all(&self.out_dir)?;
        let inputs = list_images(&self.in_dir)?;

        let staged = inputs.iter().any(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("case_"))
        });

        if staged {
            for step in 1..=CASE_STEPS {
                let percent = step * 100 / CASE_STEPS;
                write!(
                    progress,
                    "{percent:3}%|{}| step {step}/{CASE_STEPS}\r",
                    bar(percent)
                )?;
                progress.flush()?;
                thread::sleep(self.step);
            }
            fs::write(self.out_dir.join(CASE_ARTIFACT), PLACEHOLDER_IMAGE)?;
            writeln!(progress, "\nDone")?;
            return Ok(());
        }

        let total = inputs.len();
        for (index, input) in inputs.iter().enumerate() {
            for percent in (0..=100).step_by(20) {
                write!(progress, "{percent}% processing {}/{total}\r", index + 1)?;
                progress.flush()?;
                thread::sleep(self.step);
            }
            fs::write(self.out_dir.join(output_name(input)), PLACEHOLDER_IMAGE)?;
        }
        writeln!(progress, "\nBatch Done")?;
        Ok(())
    }
}

fn bar(percent: u32) -> String {
    let filled = percent as usize * BAR_WIDTH / 100;
    format!("{}{}", "#".repeat(filled), " ".repeat(BAR_WIDTH - filled))
}

fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    if !dir.is_dir() {
        return Ok(images);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && ImageFormat::from_path(&path).is_some() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn output_name(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match ImageFormat::from_name(&name) {
        Some(format) => name[..name.len() - format.extension().len()].to_string(),
        None => name,
    };
    format!("{stem}.nii.gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use segflow_core::progress::parse_percent;

    #[test]
    fn staged_case_yields_single_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().join("in");
        fs::create_dir(&in_dir).unwrap();
        fs::write(in_dir.join("case_0000.nii.gz"), b"x").unwrap();

        let mut output = Vec::new();
        MockPredict::new(&in_dir, dir.path().join("out"))
            .with_step(Duration::ZERO)
            .run(&mut output)
            .unwrap();

        let out = dir.path().join("out");
        assert_eq!(fs::read(out.join(CASE_ARTIFACT)).unwrap(), PLACEHOLDER_IMAGE);
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);

        let text = String::from_utf8(output).unwrap();
        let percents: Vec<u8> = text.split(['\r', '\n']).filter_map(parse_percent).collect();
        assert_eq!(percents.first(), Some(&5));
        assert_eq!(percents.last(), Some(&100));
        assert_eq!(percents.len(), CASE_STEPS as usize);
    }

    #[test]
    fn plain_inputs_yield_one_output_each() {
        let dir = tempfile::tempdir().unwrap();
        let in_dir = dir.path().join("in");
        fs::create_dir(&in_dir).unwrap();
        fs::write(in_dir.join("A.nii"), b"x").unwrap();
        fs::write(in_dir.join("B.nii.gz"), b"x").unwrap();
        fs::write(in_dir.join("notes.txt"), b"x").unwrap();

        let mut output = Vec::new();
        MockPredict::new(&in_dir, dir.path().join("out"))
            .with_step(Duration::ZERO)
            .run(&mut output)
            .unwrap();

        let out = dir.path().join("out");
        assert!(out.join("A.nii.gz").is_file());
        assert!(out.join("B.nii.gz").is_file());
        assert!(String::from_utf8(output).unwrap().contains("Batch Done"));
    }
}
