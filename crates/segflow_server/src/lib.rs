//! # Segflow Server
//!
//! An Axum-based job service running `nnUNetv2_predict` for remote clients.
//!
//! Provides the [`SegflowServer`] builder. Jobs are either submitted against
//! directories the server can already see (`POST /jobs`) or uploaded as a
//! single case (`POST /upload`), in which case the server owns their storage
//! and reclaims it once the result has been downloaded.
//!
//! ## Routes
//!
//! * `GET /health`: tool availability.
//! * `GET|POST /jobs`: list jobs, submit a job.
//! * `GET /jobs/{job_id}/progress`: poll a job.
//! * `GET /jobs/{job_id}/attach`: websocket pushing progress until the job ends.
//! * `POST /upload`: upload a case and start a job on it.
//! * `GET /result/{job_id}`: download the output as `.tar.gz`.
//! * `POST /test/jobs`, `POST /test/upload`: same as above, always simulated.
//!
//! ## Example
//!
//! ```no_run
//! use segflow_server::prelude::*;
//!
//! # async fn run() {
//! let app = SegflowServer::new(SegflowServerConfig::default()).build();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, app).await.unwrap();
//! # }
//! ```

mod api;

pub mod dispatcher;
pub mod reaper;
pub mod registry;
pub mod state;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    routing::{get, post},
};
use dispatcher::JobDispatcher;
use registry::JobRegistry;
use segflow_core::constants::{defaults, routes};
use segflow_local::{ExecutorConfig, PredictionExecutor};
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub use api::ClientAddr;

#[derive(Clone, Debug)]
pub struct SegflowServerConfig {
    /// How the prediction tool is found and run.
    pub executor: ExecutorConfig,
    /// How long an uploaded job's storage waits for its result to be downloaded.
    ///
    /// Defaults to 600 seconds.
    pub download_timeout: Duration,
    /// Upper bound on jobs running at the same time.
    ///
    /// Defaults to `2`.
    pub max_concurrent_jobs: usize,
    /// Simulate every job, regardless of the endpoint used.
    pub simulate_all: bool,
    /// Delay between two simulated progress steps.
    ///
    /// Defaults to 50 ms.
    pub simulation_step: Duration,
    /// Parent directory for uploaded jobs. Defaults to the system temp dir.
    pub storage_dir: Option<PathBuf>,
}

impl Default for SegflowServerConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            download_timeout: defaults::DOWNLOAD_TIMEOUT,
            max_concurrent_jobs: 2,
            simulate_all: false,
            simulation_step: Duration::from_millis(50),
            storage_dir: None,
        }
    }
}

/// The builder for the Segflow Server.
#[derive(Clone, Debug)]
pub struct SegflowServer {
    state: AppState,
}

impl Default for SegflowServer {
    fn default() -> Self {
        Self::new(SegflowServerConfig::default())
    }
}

impl SegflowServer {
    pub fn new(config: SegflowServerConfig) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let dispatcher = JobDispatcher::new(
            registry.clone(),
            PredictionExecutor::new(config.executor.clone()),
            config.max_concurrent_jobs,
            config.simulation_step,
        );

        Self {
            state: AppState {
                registry,
                dispatcher,
                config: Arc::new(config),
            },
        }
    }

    /// Shared state, e.g. to call [`AppState::shutdown`] once serving stops.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn build(self) -> Router {
        Router::new()
            .route(routes::HEALTH, get(api::health))
            .route(routes::JOBS, get(api::list_jobs).post(api::submit_job))
            .route(routes::JOB_PROGRESS, get(api::job_progress))
            .route(routes::JOB_ATTACH, get(api::attach))
            .route(routes::UPLOAD, post(api::upload))
            .route(routes::RESULT, get(api::download_result))
            .route(routes::TEST_JOBS, post(api::submit_test_job))
            .route(routes::TEST_UPLOAD, post(api::test_upload))
            .layer(DefaultBodyLimit::disable())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }
}

pub mod prelude {
    pub use crate::dispatcher::*;
    pub use crate::registry::*;
    pub use crate::state::*;
    pub use crate::{ClientAddr, SegflowServer, SegflowServerConfig};
}
