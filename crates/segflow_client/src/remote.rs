use crate::{SegflowClient, SegflowClientError};
use segflow_core::archive;
use segflow_core::case::{Case, first_image, place_result};
use segflow_core::cleanup::ScratchDir;
use segflow_core::error::PredictionError;
use segflow_core::job::{JobStatus, UploadParams};
use segflow_core::progress::ProgressUpdate;
use segflow_core::task::TaskTagSpec;
use segflow_core::traits::{CaseBackend, ProgressFn};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCRATCH_PREFIX: &str = "segflow_remote_";

/// Runs cases on a Segflow server, one upload per case.
#[derive(Debug, Clone)]
pub struct RemoteCaseBackend {
    client: SegflowClient,
    scratch_parent: Option<PathBuf>,
}

impl RemoteCaseBackend {
    pub fn new(client: SegflowClient) -> Self {
        Self {
            client,
            scratch_parent: None,
        }
    }

    /// Creates scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    pub fn client(&self) -> &SegflowClient {
        &self.client
    }
}

fn transport(e: SegflowClientError) -> PredictionError {
    PredictionError::Transport(e.to_string())
}

async fn blocking<F>(f: F) -> Result<(), PredictionError>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)??;
    Ok(())
}

impl CaseBackend for RemoteCaseBackend {
    async fn run_case(
        &self,
        case: &Case,
        output_dir: &Path,
        tag: &TaskTagSpec,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<PathBuf, PredictionError> {
        let scratch = ScratchDir::create(SCRATCH_PREFIX, self.scratch_parent.as_deref())?;

        let upload = scratch.path().join(format!("{}.tar.gz", case.id));
        let files: Vec<(PathBuf, String)> = case
            .staged_names()
            .into_iter()
            .map(|(path, name)| (path.to_path_buf(), name))
            .collect();
        let tarball = upload.clone();
        blocking(move || archive::pack_files(&files, &tarball)).await?;

        let params = UploadParams {
            dataset: tag.dataset.clone(),
            config: tag.configuration.clone(),
            folds: tag.folds.clone(),
            image_id: Some(case.id.clone()),
            date: Some(chrono::Local::now().format("%Y-%m-%d").to_string()),
        };
        let job = self
            .client
            .upload_and_start(&upload, &params)
            .await
            .map_err(transport)?;
        info!("Case {} submitted as job {}", case.id, job.job_id);

        let done = self
            .client
            .wait_until_done(&job.job_id, |progress| {
                on_progress(&ProgressUpdate::new(progress.percent, progress.line.clone()))
            })
            .await
            .map_err(transport)?;

        if done.status == JobStatus::Failed {
            return Err(PredictionError::RemoteJobFailed {
                job_id: job.job_id,
                message: done.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let result = scratch.path().join("result.tar.gz");
        self.client
            .download_result(&job.job_id, &result)
            .await
            .map_err(transport)?;

        let extracted = scratch.path().join("result");
        let (archive_path, target) = (result.clone(), extracted.clone());
        blocking(move || archive::unpack(&archive_path, &target)).await?;
        debug!("Extracted result of job {} to {}", job.job_id, extracted.display());

        let artifact =
            first_image(&extracted)?.ok_or(PredictionError::MissingOutputArtifact(extracted))?;
        Ok(place_result(&artifact, output_dir, &case.id)?)
    }
}
