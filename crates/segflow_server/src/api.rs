use crate::dispatcher::RunMode;
use crate::reaper::spawn_reaper;
use crate::state::AppState;
use crate::upload::stage_upload;

use axum::{
    Json,
    body::Body,
    extract::{
        ConnectInfo, FromRequestParts, Multipart, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use segflow_core::archive;
use segflow_core::error::{JobError, PredictionError};
use segflow_core::job::{
    HealthReport, JobCreated, JobMeta, JobProgress, JobRequest, JobSummary, UploadResponse,
};
use std::convert::Infallible;
use std::io::{Seek, SeekFrom};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

/// How often an attached socket checks its job for changes.
const ATTACH_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<JobError>() {
            return match err {
                JobError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                JobError::NotFinished(_) => (StatusCode::CONFLICT, err.to_string()),
                JobError::InvalidUpload(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                JobError::MissingOutput(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
                JobError::System(_) => {
                    error!("Internal Server JobError: {:?}", self.0);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Job Error".to_string())
                }
            }
            .into_response();
        }

        if let Some(err) = self.0.downcast_ref::<PredictionError>() {
            error!("Internal Server PredictionError: {:?}", self.0);
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }

        error!("Internal Server Error: {:?}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
            .into_response()
    }
}

/// The peer address of a request, when the server was started with connect info.
#[derive(Clone, Copy, Debug)]
pub struct ClientAddr(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

#[derive(serde::Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    simulate: bool,
}

fn start_job(state: &AppState, request: JobRequest, meta: JobMeta, simulate: bool) -> String {
    let simulate = simulate || state.config().simulate_all;
    let job_id = state
        .registry()
        .create(&request.out_dir, meta, simulate);
    let mode = if simulate {
        RunMode::Simulate
    } else {
        RunMode::Predict
    };
    state.dispatcher().dispatch(job_id.clone(), request, mode);
    job_id
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let executor = &state.config().executor;
    let exe = executor.resolve_executable().ok();

    Json(HealthReport {
        ok: true,
        nnunet: exe.is_some(),
        exe_path: exe.map(|path| path.display().to_string()),
        conda_prefix: executor
            .conda_prefix
            .as_ref()
            .map(|prefix| prefix.display().to_string()),
    })
}

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.registry().list())
}

/// POST /jobs
pub async fn submit_job(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Query(params): Query<SubmitParams>,
    Json(request): Json<JobRequest>,
) -> Json<JobCreated> {
    let meta = JobMeta {
        client_ip: client.map(|ip| ip.to_string()),
        ..Default::default()
    };
    let job_id = start_job(&state, request, meta, params.simulate);
    Json(JobCreated { job_id })
}

/// POST /test/jobs
pub async fn submit_test_job(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Json(request): Json<JobRequest>,
) -> Json<JobCreated> {
    let meta = JobMeta {
        client_ip: client.map(|ip| ip.to_string()),
        ..Default::default()
    };
    let job_id = start_job(&state, request, meta, true);
    Json(JobCreated { job_id })
}

/// GET /jobs/{job_id}/progress
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobProgress>, ApiError> {
    Ok(Json(state.registry().progress(&job_id)?))
}

/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    start_upload(state, client, multipart, false).await
}

/// POST /test/upload
pub async fn test_upload(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    start_upload(state, client, multipart, true).await
}

async fn start_upload(
    state: AppState,
    client: Option<IpAddr>,
    multipart: Multipart,
    simulate: bool,
) -> Result<Json<UploadResponse>, ApiError> {
    let staged = stage_upload(multipart, state.config().storage_dir.as_deref()).await?;
    let params = staged.params;

    let request = JobRequest {
        in_dir: staged.in_dir.clone(),
        out_dir: staged.out_dir.clone(),
        dataset: params.dataset,
        config: params.config,
        folds: params.folds,
    };
    let meta = JobMeta {
        image_id: params.image_id,
        date: params.date,
        client_ip: client.map(|ip| ip.to_string()),
    };

    let registry = state.registry();
    let job_id = start_job(&state, request, meta, simulate);
    spawn_reaper(
        registry.clone(),
        job_id.clone(),
        staged.storage,
        state.config().download_timeout,
    );

    Ok(Json(UploadResponse {
        job_id,
        in_dir: staged.in_dir,
        out_dir: staged.out_dir,
    }))
}

/// GET /result/{job_id}
///
/// The archive is built into an anonymous temp file before the job is marked
/// downloaded, so the reaper may remove the output directory while the
/// response is still streaming.
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let out_dir = state.registry().result_dir(&job_id)?;

    let archive = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
        let mut file = archive::pack_dir(&out_dir, tempfile::tempfile()?)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    })
    .await?
    .map_err(|e| JobError::System(format!("Cannot archive results: {e}")))?;

    state.registry().mark_downloaded(&job_id);

    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(archive)));
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"result.tar.gz\"",
            ),
        ],
        body,
    )
        .into_response())
}

/// GET /jobs/{job_id}/attach
pub async fn attach(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    state.registry().status(&job_id)?;
    let res = ws.on_upgrade(move |socket| handle_attach_socket(state, job_id, socket));
    Ok(res)
}

async fn handle_attach_socket(state: AppState, job_id: String, mut socket: WebSocket) {
    info!("Attached to job {}", job_id);

    let mut ticker = tokio::time::interval(ATTACH_POLL_INTERVAL);
    let mut last: Option<JobProgress> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Ok(progress) = state.registry().progress(&job_id) else {
                    break;
                };
                if last.as_ref() == Some(&progress) {
                    continue;
                }

                let terminal = progress.status.is_terminal();
                match serde_json::to_string(&progress) {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Serialization error: {:?}", e);
                        break;
                    }
                }
                if terminal {
                    break;
                }
                last = Some(progress);
            }
            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) => break,
                    Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    info!("Detached from job {}", job_id);
}
