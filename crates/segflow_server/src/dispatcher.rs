use crate::registry::JobRegistry;
use segflow_core::job::JobRequest;
use segflow_core::progress::ProgressUpdate;
use segflow_local::PredictionExecutor;
use segflow_local::simulator::{CASE_ARTIFACT, PLACEHOLDER_IMAGE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// How a dispatched job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run the configured prediction tool.
    Predict,
    /// Count from 0 to 100 and write a placeholder result.
    Simulate,
}

/// Runs jobs on the tokio runtime, at most `max_concurrent` at a time.
///
/// Jobs beyond the limit stay `running` at 0% until a slot frees up.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    registry: Arc<JobRegistry>,
    executor: PredictionExecutor,
    permits: Arc<Semaphore>,
    simulation_step: Duration,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<JobRegistry>,
        executor: PredictionExecutor,
        max_concurrent: usize,
        simulation_step: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            simulation_step,
        }
    }

    pub fn executor(&self) -> &PredictionExecutor {
        &self.executor
    }

    pub fn dispatch(&self, job_id: String, request: JobRequest, mode: RunMode) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(job_id, request, mode).await })
    }

    /// Terminates running tools and fails every job still waiting for a slot.
    pub fn shutdown(&self) {
        self.permits.close();
        self.executor.cancellation_token().cancel();
    }

    async fn run(&self, job_id: String, request: JobRequest, mode: RunMode) {
        let result = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                debug!("Starting job {job_id} ({mode:?})");
                match mode {
                    RunMode::Predict => self.predict(&job_id, &request).await,
                    RunMode::Simulate => self.simulate(&job_id, &request).await,
                }
            }
            Err(_) => Err("Server is shutting down".to_string()),
        };
        self.registry.finish(&job_id, result);
    }

    async fn predict(&self, job_id: &str, request: &JobRequest) -> Result<(), String> {
        let registry = &self.registry;
        self.executor
            .run_observed(
                request,
                |pid| registry.set_pid(job_id, pid),
                &mut |update: &ProgressUpdate| registry.record_progress(job_id, update),
            )
            .await
            .map_err(|e| e.to_string())
    }

    async fn simulate(&self, job_id: &str, request: &JobRequest) -> Result<(), String> {
        tokio::fs::create_dir_all(&request.out_dir)
            .await
            .map_err(|e| format!("Cannot create {}: {e}", request.out_dir.display()))?;

        for percent in (0..=100u8).step_by(2) {
            self.registry.record_progress(
                job_id,
                &ProgressUpdate::new(percent, format!("Simulating... {percent}%")),
            );
            tokio::time::sleep(self.simulation_step).await;
        }

        tokio::fs::write(request.out_dir.join(CASE_ARTIFACT), PLACEHOLDER_IMAGE)
            .await
            .map_err(|e| format!("Cannot write simulated result: {e}"))
    }
}
