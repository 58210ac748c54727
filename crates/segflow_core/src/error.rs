use crate::job::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single case, local or remote.
///
/// Any of these aborts the case and, in batch mode, the remaining batch.
#[derive(Error, Debug)]
pub enum PredictionError {
    /// The external executable could not be resolved.
    #[error("{0}")]
    ToolNotFound(String),

    /// The external tool exited with a non-zero code.
    #[error("Prediction failed with exit code {}: {command}", exit_code_label(.code))]
    ToolExecutionFailed { code: Option<i32>, command: String },

    /// The input directory did not contain any `.nii`/`.nii.gz` images.
    #[error("No processable images (.nii/.nii.gz) found in {}", .0.display())]
    NoCasesFound(PathBuf),

    /// The output directory is the input directory, so clearing stale results would delete inputs.
    #[error("Output directory {} is the input directory", .0.display())]
    OutputIsInput(PathBuf),

    /// The tool exited cleanly but left no image in its output directory.
    #[error("No prediction output found in {}", .0.display())]
    MissingOutputArtifact(PathBuf),

    /// HTTP failure talking to a remote job service.
    #[error("Remote transport error: {0}")]
    Transport(String),

    /// The remote job reached the `failed` state.
    #[error("Remote job {job_id} failed: {message}")]
    RemoteJobFailed { job_id: String, message: String },

    /// The run was cancelled and the child process terminated.
    #[error("Prediction cancelled")]
    Cancelled,

    /// Low-level I/O error while staging or relocating files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum JobError {
    /// The job id is unknown.
    /// Maps to **HTTP 404 Not Found**.
    #[error("Job {0} not found")]
    NotFound(String),

    /// The job has not (successfully) finished yet.
    /// Maps to **HTTP 409 Conflict**.
    #[error("Job not finished: {0}")]
    NotFinished(JobStatus),

    /// The job succeeded but its output directory is gone.
    /// Maps to **HTTP 500 Internal Server Error**.
    #[error("Missing output directory for job {0}")]
    MissingOutput(String),

    /// The uploaded payload could not be staged.
    /// Maps to **HTTP 400 Bad Request**.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Internal failure (archiving, filesystem).
    /// Maps to **HTTP 500 Internal Server Error**.
    #[error("Job system failure: {0}")]
    System(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        // Terminated by a signal.
        None => "none".to_string(),
    }
}
