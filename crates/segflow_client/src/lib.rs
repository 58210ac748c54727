//! # Segflow Client
//!
//! An async HTTP client for a Segflow job server.
//!
//! Used by the CLI to run batches remotely: [`RemoteCaseBackend`] uploads
//! each case, follows the job's progress and places the downloaded result,
//! so it plugs into a [`BatchOrchestrator`](segflow_core::batch::BatchOrchestrator)
//! just like the local runner.
//!
//! ## Example: Running a job on server-visible directories
//!
//! ```no_run
//! use segflow_client::SegflowClient;
//! use segflow_core::job::JobRequest;
//!
//! async fn run() -> segflow_client::Result<()> {
//!     let client = SegflowClient::new("http://localhost:8000");
//!
//!     let job_id = client
//!         .submit_job(
//!             &JobRequest {
//!                 in_dir: "/data/in".into(),
//!                 out_dir: "/data/out".into(),
//!                 dataset: "101".into(),
//!                 config: "3d_fullres".into(),
//!                 folds: "0".into(),
//!             },
//!             false,
//!         )
//!         .await?;
//!
//!     let done = client
//!         .wait_until_done(&job_id, |p| println!("{}% {}", p.percent, p.line))
//!         .await?;
//!     println!("{}", done.status);
//!     Ok(())
//! }
//! ```

mod remote;

pub use remote::RemoteCaseBackend;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url, multipart};
use segflow_core::constants::{defaults, routes::*};
use segflow_core::job::{
    HealthReport, JobCreated, JobProgress, JobRequest, JobSummary, UploadParams, UploadResponse,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::io::ReaderStream;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SegflowClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned error {0}: {1}")]
    ServerError(StatusCode, String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, SegflowClientError>;

#[derive(Clone, Debug)]
pub struct SegflowClient {
    base_url: String,
    client: Client,
    /// Timeout of control calls: submit, poll, health.
    request_timeout: Duration,
    /// Timeout of uploads and downloads.
    transfer_timeout: Duration,
    poll_interval: Duration,
    /// Use the always-simulated `/test/*` endpoints.
    test_endpoints: bool,
}

impl SegflowClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            request_timeout: defaults::REQUEST_TIMEOUT,
            transfer_timeout: defaults::DOWNLOAD_TIMEOUT,
            poll_interval: defaults::POLL_INTERVAL,
            test_endpoints: false,
        }
    }

    pub fn with_test_endpoints(mut self, enabled: bool) -> Self {
        self.test_endpoints = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeouts(mut self, request: Duration, transfer: Duration) -> Self {
        self.request_timeout = request;
        self.transfer_timeout = transfer;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SegflowClientError::ServerError(status, text));
        }
        Ok(response)
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let url = format!("{}{}", self.base_url, HEALTH);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SegflowClientError::Validation(format!("Failed to parse health: {e}")))
    }

    /// Starts a job on directories the server can access. Returns the job id.
    pub async fn submit_job(&self, request: &JobRequest, simulate: bool) -> Result<String> {
        let route = if self.test_endpoints { TEST_JOBS } else { JOBS };
        let url = format!("{}{}", self.base_url, route);

        let mut builder = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(request);
        if simulate && !self.test_endpoints {
            builder = builder.query(&[("simulate", true)]);
        }

        let data: JobCreated = Self::check(builder.send().await?)
            .await?
            .json()
            .await
            .map_err(|_| SegflowClientError::Validation("Failed to parse job id".into()))?;

        Ok(data.job_id)
    }

    pub async fn progress(&self, job_id: &str) -> Result<JobProgress> {
        let path = JOB_PROGRESS.replace("{job_id}", job_id);
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SegflowClientError::Validation(format!("Failed to parse progress: {e}")))
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = format!("{}{}", self.base_url, JOBS);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SegflowClientError::Validation(format!("Failed to parse job list: {e}")))
    }

    /// Polls a job until it is terminal and returns its final state.
    ///
    /// `on_change` is called whenever percent or line differ from the last poll.
    /// A failed job is returned, not turned into an error.
    pub async fn wait_until_done<F>(&self, job_id: &str, mut on_change: F) -> Result<JobProgress>
    where
        F: FnMut(&JobProgress) + Send,
    {
        let mut last: Option<(u8, String)> = None;

        loop {
            let progress = self.progress(job_id).await?;

            let current = (progress.percent, progress.line.clone());
            if last.as_ref() != Some(&current) {
                on_change(&progress);
                last = Some(current);
            }

            if progress.status.is_terminal() {
                return Ok(progress);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Uploads one case (an archive or a single image) and starts a job on it.
    pub async fn upload_and_start(
        &self,
        path: &Path,
        params: &UploadParams,
    ) -> Result<UploadResponse> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SegflowClientError::Validation(format!("{} is not a file", path.display()))
            })?;

        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, size).file_name(file_name);

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("dataset", params.dataset.clone())
            .text("config", params.config.clone())
            .text("folds", params.folds.clone());
        if let Some(image_id) = &params.image_id {
            form = form.text("image_id", image_id.clone());
        }
        if let Some(date) = &params.date {
            form = form.text("date", date.clone());
        }

        let route = if self.test_endpoints { TEST_UPLOAD } else { UPLOAD };
        let url = format!("{}{}", self.base_url, route);
        let response = self
            .client
            .post(&url)
            .timeout(self.transfer_timeout)
            .multipart(form)
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|_| SegflowClientError::Validation("Failed to parse upload response".into()))
    }

    /// Streams the result archive of a finished job into `dest`.
    pub async fn download_result(&self, job_id: &str, dest: &Path) -> Result<()> {
        let path = RESULT.replace("{job_id}", job_id);
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .timeout(self.transfer_timeout)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        debug!("Downloaded result of job {job_id} to {}", dest.display());
        Ok(())
    }

    /// Follows a job over a websocket until the server closes it.
    ///
    /// Returns the last state received, which is terminal unless the
    /// connection dropped early.
    pub async fn attach<F>(&self, job_id: &str, mut on_progress: F) -> Result<Option<JobProgress>>
    where
        F: FnMut(&JobProgress) + Send,
    {
        let path = JOB_ATTACH.replace("{job_id}", job_id);
        let url = format!("{}{}", self.base_url, path);
        let ws_url = if Url::from_str(url.as_str())?.scheme() == "https" {
            url.replacen("https://", "wss://", 1)
        } else {
            url.replacen("http://", "ws://", 1)
        };

        let req = ws_url.into_client_request()?;
        let (mut stream, res) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(res) => {
                    SegflowClientError::ServerError(res.status(), "Handshake rejected".into())
                }
                _ => SegflowClientError::WebSocket(e),
            })?;

        if res.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(SegflowClientError::ServerError(
                res.status(),
                "Upgrade failed".into(),
            ));
        }

        let mut last = None;
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let progress: JobProgress = serde_json::from_str(&text).map_err(|e| {
                        SegflowClientError::Validation(format!("Failed to parse progress: {e}"))
                    })?;
                    on_progress(&progress);
                    last = Some(progress);
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    return Err(SegflowClientError::Connection(format!(
                        "Connection error: {}",
                        e
                    )));
                }
                _ => {}
            }
        }

        Ok(last)
    }
}
