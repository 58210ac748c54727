use crate::constants::defaults;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A request to run one prediction over an input/output directory pair.
///
/// Used both as the body of `POST /jobs` and as the input of a local run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    /// Directory holding the staged `case_NNNN` channel files.
    pub in_dir: PathBuf,
    /// Directory the tool writes its prediction into.
    pub out_dir: PathBuf,
    /// Dataset identifier (`-d`).
    pub dataset: String,
    /// Configuration name (`-c`), e.g. `3d_fullres`.
    #[serde(default = "default_config")]
    pub config: String,
    /// Fold specifier (`-f`).
    #[serde(default = "default_folds")]
    pub folds: String,
}

fn default_config() -> String {
    defaults::CONFIGURATION.to_string()
}

fn default_folds() -> String {
    defaults::FOLDS.to_string()
}

/// Lifecycle of a remote job. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        })
    }
}

/// Optional metadata attached to uploaded jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobMeta {
    pub image_id: Option<String>,
    pub date: Option<String>,
    pub client_ip: Option<String>,
}

/// Response of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: String,
}

/// Response of `GET /jobs/{job_id}/progress`, also pushed over the attach socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub status: JobStatus,
    pub percent: u8,
    pub line: String,
    pub error: Option<String>,
    #[serde(default)]
    pub meta: JobMeta,
}

/// Entry of `GET /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    pub line: String,
    pub simulated: bool,
    /// Process id of the running tool, if any.
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub meta: JobMeta,
}

/// Response of `POST /upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
}

/// Form fields sent alongside an uploaded case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadParams {
    pub dataset: String,
    pub config: String,
    pub folds: String,
    pub image_id: Option<String>,
    pub date: Option<String>,
}

impl Default for UploadParams {
    fn default() -> Self {
        Self {
            dataset: defaults::DATASET.to_string(),
            config: default_config(),
            folds: default_folds(),
            image_id: None,
            date: None,
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    /// Whether the external segmentation executable could be resolved.
    pub nnunet: bool,
    pub exe_path: Option<String>,
    pub conda_prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Success).unwrap(),
            "\"success\""
        );
        let status: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert!(status.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn job_request_fills_defaults() {
        let req: JobRequest =
            serde_json::from_str(r#"{"in_dir":"/a","out_dir":"/b","dataset":"7"}"#).unwrap();
        assert_eq!(req.config, "3d_fullres");
        assert_eq!(req.folds, "0");
    }

    #[test]
    fn progress_wire_shape() {
        let progress = JobProgress {
            percent: 42,
            line: "42%".into(),
            ..Default::default()
        };
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["percent"], 42);
        assert!(value["meta"]["image_id"].is_null());
        assert!(value["error"].is_null());
    }
}
