pub mod routes {
    pub const HEALTH: &str = "/health";

    pub const JOBS: &str = "/jobs";
    pub const JOB_PROGRESS: &str = "/jobs/{job_id}/progress";
    pub const JOB_ATTACH: &str = "/jobs/{job_id}/attach";

    pub const UPLOAD: &str = "/upload";
    pub const RESULT: &str = "/result/{job_id}";

    pub const TEST_JOBS: &str = "/test/jobs";
    pub const TEST_UPLOAD: &str = "/test/upload";
}

pub mod defaults {
    use std::time::Duration;

    pub const DATASET: &str = "101";
    pub const CONFIGURATION: &str = "3d_fullres";
    pub const FOLDS: &str = "0";

    /// Minimum spacing between two emissions of an unchanged percent.
    pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(200);
    /// Client-side progress poll interval.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
    /// Timeout for control calls (submit, poll, health).
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// How long a finished job's storage waits for its result to be downloaded.
    pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

    /// Longest progress line kept in a job's state.
    pub const MAX_LINE_CHARS: usize = 200;
}

pub mod files {
    /// Name of the external segmentation executable.
    pub const PREDICT_EXECUTABLE: &str = "nnUNetv2_predict";
    pub const PROGRESS_LOG: &str = "predict_progress.log";

    /// Files the external tool leaves next to its predictions.
    pub const BOOKKEEPING: [&str; 4] = [
        PROGRESS_LOG,
        "dataset.json",
        "plans.json",
        "predict_from_raw_data_args.json",
    ];

    /// Stem of staged channel files, e.g. `case_0000.nii.gz`.
    pub const STAGED_CASE_STEM: &str = "case";
    /// Default output directory name, created next to the input directory.
    pub const SEG_DIR: &str = "seg";
}
