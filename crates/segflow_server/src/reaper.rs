use crate::registry::JobRegistry;
use segflow_core::cleanup::ScratchDir;
use segflow_core::job::JobStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Removes the temporary storage of an uploaded job once it is no longer needed.
///
/// Waits for the job to finish. A successful job then gets up to
/// `download_timeout` for its result to be downloaded; a failed one is
/// reclaimed immediately. The job's state stays pollable afterwards.
pub fn spawn_reaper(
    registry: Arc<JobRegistry>,
    job_id: String,
    storage: ScratchDir,
    download_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(signals) = registry.signals(&job_id) {
            signals.finished.notified().await;

            if matches!(registry.status(&job_id), Ok(JobStatus::Success))
                && tokio::time::timeout(download_timeout, signals.downloaded.notified())
                    .await
                    .is_err()
            {
                info!(
                    "Result of job {job_id} not downloaded within {}s",
                    download_timeout.as_secs()
                );
            }
        }

        let root = storage.path().to_path_buf();
        if let Err(e) = tokio::task::spawn_blocking(move || drop(storage)).await {
            warn!("Cleanup of {} did not complete: {e}", root.display());
        }
        registry.forget_storage(&job_id);
        info!("Reclaimed storage of job {job_id}");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use segflow_core::job::JobMeta;
    use std::time::Instant;

    fn uploaded_job(registry: &JobRegistry) -> (String, ScratchDir) {
        let storage = ScratchDir::create("segflow_job_", None).unwrap();
        std::fs::create_dir(storage.path().join("out")).unwrap();
        let job_id = registry.create(&storage.path().join("out"), JobMeta::default(), true);
        (job_id, storage)
    }

    #[tokio::test]
    async fn downloaded_result_is_reclaimed_promptly() {
        let registry = Arc::new(JobRegistry::new());
        let (job_id, storage) = uploaded_job(&registry);
        let root = storage.path().to_path_buf();

        let reaper = spawn_reaper(
            registry.clone(),
            job_id.clone(),
            storage,
            Duration::from_secs(600),
        );

        registry.finish(&job_id, Ok(()));
        registry.mark_downloaded(&job_id);

        let started = Instant::now();
        reaper.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!root.exists());
        assert!(registry.signals(&job_id).is_none());
        assert_eq!(registry.status(&job_id).unwrap(), JobStatus::Success);
    }

    #[tokio::test]
    async fn undownloaded_result_is_reclaimed_at_timeout() {
        let registry = Arc::new(JobRegistry::new());
        let (job_id, storage) = uploaded_job(&registry);
        let root = storage.path().to_path_buf();

        let reaper = spawn_reaper(
            registry.clone(),
            job_id.clone(),
            storage,
            Duration::from_millis(100),
        );
        registry.finish(&job_id, Ok(()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(root.exists());

        reaper.await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn failed_job_is_reclaimed_without_waiting() {
        let registry = Arc::new(JobRegistry::new());
        let (job_id, storage) = uploaded_job(&registry);
        let root = storage.path().to_path_buf();

        let reaper = spawn_reaper(
            registry.clone(),
            job_id.clone(),
            storage,
            Duration::from_secs(600),
        );
        registry.finish(&job_id, Err("boom".into()));

        tokio::time::timeout(Duration::from_secs(5), reaper)
            .await
            .unwrap()
            .unwrap();
        assert!(!root.exists());
    }
}
