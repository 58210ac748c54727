//! Best-effort removal of scratch files and directories.
//!
//! Cleanup never replaces the primary outcome of an operation, but its
//! failures are still logged instead of being dropped silently.

use crate::constants::files;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum CleanupOutcome {
    Removed,
    /// Nothing to remove.
    Missing,
    Failed(io::Error),
}

impl CleanupOutcome {
    pub fn from_result(result: io::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Removed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::Missing,
            Err(e) => Self::Failed(e),
        }
    }

    /// Logs the outcome for `path`.
    pub fn report(self, path: &Path) -> Self {
        match &self {
            Self::Removed => debug!("Removed {}", path.display()),
            Self::Missing => {}
            Self::Failed(e) => warn!("Failed to clean up {}: {e}", path.display()),
        }
        self
    }
}

pub fn remove_dir(path: &Path) -> CleanupOutcome {
    CleanupOutcome::from_result(std::fs::remove_dir_all(path)).report(path)
}

pub fn remove_file(path: &Path) -> CleanupOutcome {
    CleanupOutcome::from_result(std::fs::remove_file(path)).report(path)
}

/// Removes the external tool's bookkeeping files (log, `dataset.json`, ...) from `dir`.
pub fn remove_bookkeeping(dir: &Path) {
    for name in files::BOOKKEEPING {
        remove_file(&dir.join(name));
    }
}

/// Removes results of a previous run from `dir`: images and bookkeeping files.
///
/// Subdirectories and unrelated files are left alone.
pub fn clear_previous_results(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Cannot list {} for cleanup: {e}", dir.display());
            }
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if crate::case::ImageFormat::from_name(&name).is_some()
            || files::BOOKKEEPING.contains(&name.as_ref())
        {
            remove_file(&path);
        }
    }
}

/// A scratch directory removed when dropped, on every exit path.
///
/// Unlike a bare [`TempDir`], a failed removal is reported.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Creates `<parent>/<prefix>XXXXXX`, or under the system temp dir when `parent` is [`None`].
    pub fn create(prefix: &str, parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            CleanupOutcome::from_result(dir.close()).report(&self.path);
        }
    }
}
