use crate::case::Case;
use crate::error::PredictionError;
use crate::progress::ProgressUpdate;
use crate::task::TaskTagSpec;

use std::path::{Path, PathBuf};

/// Progress callback for a single case. Percentages are case-local (0..=100).
pub type ProgressFn<'a> = dyn FnMut(&ProgressUpdate) + Send + 'a;

/// A trait for injecting case execution into the [`BatchOrchestrator`](crate::batch::BatchOrchestrator).
///
/// Implemented by the local process runner and by the remote job client.
pub trait CaseBackend: Send + Sync {
    /// Segments one case and places the result in `output_dir` as `<case id><ext>`.
    ///
    /// Returns the path of the written result.
    fn run_case(
        &self,
        case: &Case,
        output_dir: &Path,
        tag: &TaskTagSpec,
        on_progress: &mut ProgressFn<'_>,
    ) -> impl Future<Output = Result<PathBuf, PredictionError>> + Send;
}
