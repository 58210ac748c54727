use crate::executor::PredictionExecutor;
use segflow_core::case::{Case, first_image, place_result};
use segflow_core::cleanup::ScratchDir;
use segflow_core::error::PredictionError;
use segflow_core::job::JobRequest;
use segflow_core::task::TaskTagSpec;
use segflow_core::traits::{CaseBackend, ProgressFn};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCRATCH_PREFIX: &str = "segflow_case_";

/// Runs single cases through a local [`PredictionExecutor`].
///
/// Each case is staged into its own scratch directory under canonical
/// `case_NNNN` names, predicted there, and only the first resulting image is
/// moved to the final output directory as `<case id><ext>`.
#[derive(Debug, Clone)]
pub struct CaseRunner {
    executor: PredictionExecutor,
    scratch_parent: Option<PathBuf>,
}

impl CaseRunner {
    pub fn new(executor: PredictionExecutor) -> Self {
        Self {
            executor,
            scratch_parent: None,
        }
    }

    /// Creates scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    pub fn executor(&self) -> &PredictionExecutor {
        &self.executor
    }

    pub async fn run(
        &self,
        case: &Case,
        output_dir: &Path,
        tag: &TaskTagSpec,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<PathBuf, PredictionError> {
        let scratch = ScratchDir::create(SCRATCH_PREFIX, self.scratch_parent.as_deref())?;
        let in_dir = scratch.path().join("in");
        let out_dir = scratch.path().join("out");
        tokio::fs::create_dir_all(&in_dir).await?;
        tokio::fs::create_dir_all(&out_dir).await?;

        for (source, name) in case.staged_names() {
            tokio::fs::copy(source, in_dir.join(&name)).await?;
        }
        debug!("Staged case {} in {}", case.id, in_dir.display());

        let request = JobRequest {
            in_dir,
            out_dir: out_dir.clone(),
            dataset: tag.dataset.clone(),
            config: tag.configuration.clone(),
            folds: tag.folds.clone(),
        };
        self.executor.run(&request, on_progress).await?;

        let artifact =
            first_image(&out_dir)?.ok_or(PredictionError::MissingOutputArtifact(out_dir))?;
        let destination = place_result(&artifact, output_dir, &case.id)?;
        debug!("Case {} written to {}", case.id, destination.display());
        Ok(destination)
    }
}

impl CaseBackend for CaseRunner {
    async fn run_case(
        &self,
        case: &Case,
        output_dir: &Path,
        tag: &TaskTagSpec,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<PathBuf, PredictionError> {
        self.run(case, output_dir, tag, on_progress).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::{ExecutorConfig, SimulatorCommand};
    use segflow_core::progress::ProgressUpdate;
    use std::fs;

    fn runner(script: &str, scratch: &Path) -> CaseRunner {
        let config = ExecutorConfig::default()
            .with_simulator(SimulatorCommand::new("sh").arg("-c").arg(script).arg("sim"));
        CaseRunner::new(PredictionExecutor::new(config)).with_scratch_dir(scratch)
    }

    fn two_channel_case(dir: &Path) -> Case {
        let files = vec![dir.join("A_0000.nii.gz"), dir.join("A_0001.nii")];
        for file in &files {
            fs::write(file, b"img").unwrap();
        }
        Case {
            id: "A".into(),
            files,
        }
    }

    fn scratch_is_empty(scratch: &Path) -> bool {
        fs::read_dir(scratch).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn stages_canonical_names_and_places_result() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let case = two_channel_case(root.path());

        let runner = runner(
            r#"test -f "$2/case_0000.nii.gz" && test -f "$2/case_0001.nii" || exit 9
               echo '100%'; echo seg > "$4/case.nii.gz"; echo '{}' > "$4/dataset.json""#,
            &scratch,
        );

        let final_dir = root.path().join("seg");
        let mut last = None;
        let result = runner
            .run(&case, &final_dir, &TaskTagSpec::default(), &mut |u: &ProgressUpdate| {
                last = Some(u.percent)
            })
            .await
            .unwrap();

        assert_eq!(result, final_dir.join("A.nii.gz"));
        assert_eq!(fs::read_to_string(&result).unwrap(), "seg\n");
        assert_eq!(last, Some(100));
        assert_eq!(fs::read_dir(&final_dir).unwrap().count(), 1);
        assert!(scratch_is_empty(&scratch));
    }

    #[tokio::test]
    async fn keeps_the_artifact_extension() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let case = two_channel_case(root.path());

        let runner = runner(r#"echo seg > "$4/out.nii""#, &scratch);
        let result = runner
            .run(&case, root.path(), &TaskTagSpec::default(), &mut |_: &ProgressUpdate| {})
            .await
            .unwrap();

        assert_eq!(result, root.path().join("A.nii"));
    }

    #[tokio::test]
    async fn failure_still_removes_scratch() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let case = two_channel_case(root.path());

        let err = runner("exit 4", &scratch)
            .run(
                &case,
                &root.path().join("seg"),
                &TaskTagSpec::default(),
                &mut |_: &ProgressUpdate| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionError::ToolExecutionFailed { code: Some(4), .. }));
        assert!(scratch_is_empty(&scratch));
        assert!(!root.path().join("seg").exists());
    }

    #[tokio::test]
    async fn missing_artifact_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let case = two_channel_case(root.path());

        let err = runner("echo nothing to do", &scratch)
            .run(
                &case,
                &root.path().join("seg"),
                &TaskTagSpec::default(),
                &mut |_: &ProgressUpdate| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionError::MissingOutputArtifact(_)));
        assert!(scratch_is_empty(&scratch));
    }
}
