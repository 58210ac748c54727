use segflow_core::constants::defaults;
use segflow_core::error::JobError;
use segflow_core::job::{JobMeta, JobProgress, JobStatus, JobSummary};
use segflow_core::progress::ProgressUpdate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Pollable state of one job. Kept for the lifetime of the server.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub percent: u8,
    pub line: String,
    pub error: Option<String>,
    pub meta: JobMeta,
    pub pid: Option<u32>,
    pub simulated: bool,
}

impl JobState {
    fn new(meta: JobMeta, simulated: bool) -> Self {
        Self {
            status: JobStatus::Running,
            percent: 0,
            line: String::new(),
            error: None,
            meta,
            pid: None,
            simulated,
        }
    }

    pub fn to_progress(&self) -> JobProgress {
        JobProgress {
            status: self.status,
            percent: self.percent,
            line: self.line.clone(),
            error: self.error.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Wakes the reaper of a job.
#[derive(Debug, Default)]
pub struct JobSignals {
    pub finished: Notify,
    pub downloaded: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobState>,
    /// Creation order, for listings.
    order: Vec<String>,
    out_dirs: HashMap<String, PathBuf>,
    downloaded: HashSet<String>,
    signals: HashMap<String, Arc<JobSignals>>,
}

/// All jobs known to the server and their storage bookkeeping.
///
/// One lock guards everything; it is never held across an `.await`.
#[derive(Debug, Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new `running` job writing into `out_dir` and returns its id.
    pub fn create(&self, out_dir: &Path, meta: JobMeta, simulated: bool) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut inner = self.lock();
        inner
            .jobs
            .insert(job_id.clone(), JobState::new(meta, simulated));
        inner.order.push(job_id.clone());
        inner.out_dirs.insert(job_id.clone(), out_dir.to_path_buf());
        inner
            .signals
            .insert(job_id.clone(), Arc::new(JobSignals::default()));
        drop(inner);

        info!("Created job {job_id} (simulated: {simulated})");
        job_id
    }

    pub fn set_pid(&self, job_id: &str, pid: Option<u32>) {
        if let Some(state) = self.lock().jobs.get_mut(job_id) {
            state.pid = pid;
        }
    }

    /// Stores the latest progress of a running job. Ignored once the job is terminal.
    pub fn record_progress(&self, job_id: &str, update: &ProgressUpdate) {
        let mut inner = self.lock();
        let Some(state) = inner.jobs.get_mut(job_id) else {
            return;
        };
        if state.status.is_terminal() {
            return;
        }
        state.percent = update.percent.min(100);
        state.line = tail_chars(update.line.trim(), defaults::MAX_LINE_CHARS);
    }

    /// Moves a job to its terminal state. Later calls are ignored.
    pub fn finish(&self, job_id: &str, result: Result<(), String>) {
        let mut inner = self.lock();
        let Some(state) = inner.jobs.get_mut(job_id) else {
            return;
        };
        if state.status.is_terminal() {
            debug!("Job {job_id} already finished, ignoring");
            return;
        }

        state.pid = None;
        match result {
            Ok(()) => {
                state.status = JobStatus::Success;
                state.percent = 100;
                info!("Job {job_id} succeeded");
            }
            Err(message) => {
                info!("Job {job_id} failed: {message}");
                state.status = JobStatus::Failed;
                state.error = Some(message);
            }
        }

        if let Some(signals) = inner.signals.get(job_id) {
            signals.finished.notify_one();
        }
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus, JobError> {
        self.lock()
            .jobs
            .get(job_id)
            .map(|state| state.status)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn progress(&self, job_id: &str) -> Result<JobProgress, JobError> {
        self.lock()
            .jobs
            .get(job_id)
            .map(JobState::to_progress)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn list(&self) -> Vec<JobSummary> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|job_id| {
                inner.jobs.get(job_id).map(|state| JobSummary {
                    job_id: job_id.clone(),
                    status: state.status,
                    percent: state.percent,
                    line: state.line.clone(),
                    simulated: state.simulated,
                    pid: state.pid,
                    meta: state.meta.clone(),
                })
            })
            .collect()
    }

    /// The output directory of a successfully finished job.
    pub fn result_dir(&self, job_id: &str) -> Result<PathBuf, JobError> {
        let inner = self.lock();
        let state = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if state.status != JobStatus::Success {
            return Err(JobError::NotFinished(state.status));
        }

        match inner.out_dirs.get(job_id) {
            Some(dir) if dir.is_dir() => Ok(dir.clone()),
            _ => Err(JobError::MissingOutput(job_id.to_string())),
        }
    }

    pub fn mark_downloaded(&self, job_id: &str) {
        let mut inner = self.lock();
        if inner.downloaded.insert(job_id.to_string()) {
            debug!("Result of job {job_id} downloaded");
        }
        if let Some(signals) = inner.signals.get(job_id) {
            signals.downloaded.notify_one();
        }
    }

    pub fn is_downloaded(&self, job_id: &str) -> bool {
        self.lock().downloaded.contains(job_id)
    }

    pub fn signals(&self, job_id: &str) -> Option<Arc<JobSignals>> {
        self.lock().signals.get(job_id).cloned()
    }

    /// Drops the storage bookkeeping of a reaped job. The job stays pollable.
    pub fn forget_storage(&self, job_id: &str) {
        let mut inner = self.lock();
        inner.out_dirs.remove(job_id);
        inner.downloaded.remove(job_id);
        inner.signals.remove(job_id);
    }
}

/// The last `max` characters of `line`.
fn tail_chars(line: &str, max: usize) -> String {
    let count = line.chars().count();
    line.chars().skip(count.saturating_sub(max)).collect()
}
