use crate::case::collect_cases;
use crate::cleanup;
use crate::error::PredictionError;
use crate::progress::ProgressUpdate;
use crate::task::{Task, TaskTagSpec};
use crate::traits::CaseBackend;

use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Maps case-local progress of case `index` out of `total` to overall progress.
///
/// Integer floor division throughout; capped at 99 so 100 is only ever
/// reported once every case has finished.
pub fn overall_percent(index: usize, total: usize, inner: u8) -> u8 {
    if total == 0 {
        return 0;
    }
    let base = index * 100 / total;
    let share = usize::from(inner.min(100)) / total;
    (base + share).min(99) as u8
}

/// Whether `a` and `b` resolve to the same existing directory.
fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Runs every case of a [`Task`] through a [`CaseBackend`], one at a time.
pub struct BatchOrchestrator<B> {
    backend: B,
}

impl<B: CaseBackend> BatchOrchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Executes `task`, leaving it in a terminal state.
    ///
    /// `on_progress` receives overall progress; `on_case_done` receives each
    /// case id with the path of its result as soon as the case finishes. The
    /// first failing case aborts the batch; results of earlier cases stay in
    /// the output directory.
    pub async fn run<P, D>(
        &self,
        task: &mut Task,
        tag: &TaskTagSpec,
        mut on_progress: P,
        mut on_case_done: D,
    ) where
        P: FnMut(&ProgressUpdate) + Send,
        D: FnMut(&str, &Path) + Send,
    {
        task.start();

        match self
            .run_cases(task, tag, &mut on_progress, &mut on_case_done)
            .await
        {
            Ok(output_dir) => {
                info!("Task finished, results in {}", output_dir.display());
                on_progress(&ProgressUpdate::new(100, "done"));
                task.succeed(output_dir);
            }
            Err(e) => {
                error!("Task failed: {e}");
                task.fail(e.to_string());
            }
        }
    }

    async fn run_cases<P, D>(
        &self,
        task: &Task,
        tag: &TaskTagSpec,
        on_progress: &mut P,
        on_case_done: &mut D,
    ) -> Result<PathBuf, PredictionError>
    where
        P: FnMut(&ProgressUpdate) + Send,
        D: FnMut(&str, &Path) + Send,
    {
        let cases = collect_cases(&task.input_dir)?;
        if cases.is_empty() {
            return Err(PredictionError::NoCasesFound(task.input_dir.clone()));
        }

        let output_dir = task.resolve_output_dir();
        if same_dir(&output_dir, &task.input_dir) {
            return Err(PredictionError::OutputIsInput(output_dir));
        }
        std::fs::create_dir_all(&output_dir)?;
        cleanup::clear_previous_results(&output_dir);

        let total = cases.len();
        for (index, case) in cases.iter().enumerate() {
            info!("Case {} ({}/{total})", case.id, index + 1);
            on_progress(&ProgressUpdate::new(
                overall_percent(index, total, 0),
                format!("Case {} ({}/{total})", case.id, index + 1),
            ));

            let mut case_progress = |update: &ProgressUpdate| {
                on_progress(&ProgressUpdate::new(
                    overall_percent(index, total, update.percent),
                    update.line.clone(),
                ));
            };

            let result = self
                .backend
                .run_case(case, &output_dir, tag, &mut case_progress)
                .await?;
            on_case_done(&case.id, &result);
        }

        cleanup::remove_bookkeeping(&output_dir);
        Ok(output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use crate::traits::ProgressFn;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        fail_on: Option<String>,
        seen: Mutex<Vec<String>>,
    }

    impl CaseBackend for FakeBackend {
        async fn run_case(
            &self,
            case: &crate::case::Case,
            output_dir: &Path,
            _tag: &TaskTagSpec,
            on_progress: &mut ProgressFn<'_>,
        ) -> Result<PathBuf, PredictionError> {
            self.seen.lock().unwrap().push(case.id.clone());
            if self.fail_on.as_deref() == Some(case.id.as_str()) {
                return Err(PredictionError::ToolExecutionFailed {
                    code: Some(2),
                    command: "fake".into(),
                });
            }
            for percent in [0, 50, 100] {
                on_progress(&ProgressUpdate::new(percent, format!("{percent}%")));
            }
            let path = output_dir.join(format!("{}.nii.gz", case.id));
            fs::write(&path, b"seg")?;
            Ok(path)
        }
    }

    fn input_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        for name in names {
            fs::write(images.join(name), b"img").unwrap();
        }
        dir
    }

    #[test]
    fn overall_progress_uses_floor_and_caps_at_99() {
        assert_eq!(overall_percent(2, 4, 100), 75);
        assert_eq!(overall_percent(0, 3, 50), 16);
        assert_eq!(overall_percent(3, 4, 100), 99);
        assert_eq!(overall_percent(0, 1, 100), 99);
        assert_eq!(overall_percent(0, 0, 100), 0);
    }

    #[tokio::test]
    async fn runs_all_cases_and_reports_progress() {
        let dir = input_with(&["A_0000.nii.gz", "A_0001.nii.gz", "B.nii", "C.nii"]);
        let mut task = Task::new(dir.path().join("images"));
        let orchestrator = BatchOrchestrator::new(FakeBackend::default());

        let mut percents = Vec::new();
        let mut done = Vec::new();
        orchestrator
            .run(
                &mut task,
                &TaskTagSpec::default(),
                |u: &ProgressUpdate| percents.push(u.percent),
                |id: &str, path: &Path| done.push((id.to_string(), path.to_path_buf())),
            )
            .await;

        assert_eq!(task.status, TaskStatus::Success);
        let seg = dir.path().join("seg");
        assert_eq!(task.output_dir.as_deref(), Some(seg.as_path()));
        assert!(task.started_at.is_some() && task.finished_at.is_some());

        assert_eq!(
            done.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
        assert!(done.iter().all(|(_, path)| path.is_file()));

        let (last, rest) = percents.split_last().unwrap();
        assert_eq!(*last, 100);
        assert!(rest.iter().all(|p| *p <= 99));
        assert!(rest.contains(&66));
    }

    #[tokio::test]
    async fn empty_input_fails_the_task() {
        let dir = input_with(&["readme.txt"]);
        let mut task = Task::new(dir.path().join("images"));
        let orchestrator = BatchOrchestrator::new(FakeBackend::default());

        orchestrator
            .run(
                &mut task,
                &TaskTagSpec::default(),
                |_: &ProgressUpdate| {},
                |_: &str, _: &Path| {},
            )
            .await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("No processable images"));
        assert!(task.output_dir.is_none());
    }

    #[tokio::test]
    async fn first_failure_aborts_without_rollback() {
        let dir = input_with(&["A.nii", "B.nii", "C.nii"]);
        let mut task = Task::new(dir.path().join("images"));
        let orchestrator = BatchOrchestrator::new(FakeBackend {
            fail_on: Some("B".into()),
            ..Default::default()
        });

        let mut last_percent = 0;
        orchestrator
            .run(
                &mut task,
                &TaskTagSpec::default(),
                |u: &ProgressUpdate| last_percent = u.percent,
                |_: &str, _: &Path| {},
            )
            .await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("exit code 2"));
        assert_eq!(*orchestrator.backend().seen.lock().unwrap(), vec!["A", "B"]);
        assert!(dir.path().join("seg").join("A.nii.gz").is_file());
        assert!(last_percent < 100);
    }

    #[tokio::test]
    async fn stale_results_are_cleared_first() {
        let dir = input_with(&["A.nii"]);
        let seg = dir.path().join("seg");
        fs::create_dir(&seg).unwrap();
        fs::write(seg.join("old.nii.gz"), b"stale").unwrap();

        let mut task = Task::new(dir.path().join("images"));
        BatchOrchestrator::new(FakeBackend::default())
            .run(
                &mut task,
                &TaskTagSpec::default(),
                |_: &ProgressUpdate| {},
                |_: &str, _: &Path| {},
            )
            .await;

        assert_eq!(task.status, TaskStatus::Success);
        assert!(!seg.join("old.nii.gz").exists());
        assert!(seg.join("A.nii.gz").exists());
    }

    #[tokio::test]
    async fn output_dir_equal_to_input_is_refused() {
        let dir = input_with(&["A_0000.nii.gz", "B.nii"]);
        let images = dir.path().join("images");
        let mut task = Task::new(&images).with_output_dir(&images);
        let orchestrator = BatchOrchestrator::new(FakeBackend::default());

        orchestrator
            .run(
                &mut task,
                &TaskTagSpec::default(),
                |_: &ProgressUpdate| {},
                |_: &str, _: &Path| {},
            )
            .await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("is the input directory"));
        assert!(orchestrator.backend().seen.lock().unwrap().is_empty());
        assert_eq!(fs::read(images.join("A_0000.nii.gz")).unwrap(), b"img");
        assert_eq!(fs::read(images.join("B.nii")).unwrap(), b"img");
    }

    #[tokio::test]
    async fn output_dir_reached_through_dot_segments_is_refused() {
        let dir = input_with(&["A.nii.gz"]);
        let images = dir.path().join("images");
        let mut task =
            Task::new(&images).with_output_dir(images.join(".").join("..").join("images"));

        BatchOrchestrator::new(FakeBackend::default())
            .run(
                &mut task,
                &TaskTagSpec::default(),
                |_: &ProgressUpdate| {},
                |_: &str, _: &Path| {},
            )
            .await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(images.join("A.nii.gz").is_file());
    }
}
