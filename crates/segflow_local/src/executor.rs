use crate::lines::ToolLineCodec;
use futures::StreamExt;
use segflow_core::cleanup;
use segflow_core::constants::{defaults, files};
use segflow_core::error::PredictionError;
use segflow_core::job::JobRequest;
use segflow_core::progress::ProgressThrottle;
use segflow_core::traits::ProgressFn;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::{Child, Command};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A program standing in for the real segmentation executable.
///
/// The usual prediction arguments (`-i`, `-o`, `-d`, `-c`, `-f`) are appended
/// after `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl SimulatorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// How the external executable is located and driven.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Explicit path to the executable. Checked first.
    pub executable: Option<PathBuf>,
    /// Environment prefix containing `bin/` (or `Scripts\` on Windows).
    pub conda_prefix: Option<PathBuf>,
    /// Directories to search, in `PATH` syntax. [`None`] uses the process `PATH`.
    pub search_path: Option<OsString>,
    /// Run this instead of the real tool when set.
    pub simulator: Option<SimulatorCommand>,
    /// Spacing of repeated progress emissions.
    pub throttle: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            executable: None,
            conda_prefix: None,
            search_path: None,
            simulator: None,
            throttle: defaults::PROGRESS_THROTTLE,
        }
    }
}

impl ExecutorConfig {
    /// Reads `NNUNET_PREDICT_EXE` and `NNUNET_CONDA_PREFIX` (falling back to `CONDA_PREFIX`).
    pub fn from_env() -> Self {
        let non_empty = |key: &str| env::var_os(key).filter(|value| !value.is_empty());

        Self {
            executable: non_empty("NNUNET_PREDICT_EXE").map(PathBuf::from),
            conda_prefix: non_empty("NNUNET_CONDA_PREFIX")
                .or_else(|| non_empty("CONDA_PREFIX"))
                .map(PathBuf::from),
            ..Default::default()
        }
    }

    pub fn with_simulator(mut self, simulator: SimulatorCommand) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Locates the real executable: explicit path, then conda prefix, then the search path.
    pub fn resolve_executable(&self) -> Result<PathBuf, PredictionError> {
        if let Some(exe) = &self.executable {
            return if exe.is_file() {
                Ok(exe.clone())
            } else {
                Err(PredictionError::ToolNotFound(format!(
                    "Configured executable {} does not exist",
                    exe.display()
                )))
            };
        }

        if let Some(prefix) = &self.conda_prefix {
            let candidates = [
                prefix
                    .join("Scripts")
                    .join(format!("{}.exe", files::PREDICT_EXECUTABLE)),
                prefix.join("bin").join(files::PREDICT_EXECUTABLE),
            ];
            if let Some(found) = candidates.into_iter().find(|c| c.is_file()) {
                return Ok(found);
            }
        }

        let search_path = self.search_path.clone().or_else(|| env::var_os("PATH"));
        if let Some(found) = search_path.and_then(|paths| find_in_path(&paths)) {
            return Ok(found);
        }

        Err(PredictionError::ToolNotFound(format!(
            "{} not found. Install nnU-Net v2 or set NNUNET_CONDA_PREFIX to its environment.",
            files::PREDICT_EXECUTABLE
        )))
    }

    /// Builds the full command line for `request`.
    pub fn command(&self, request: &JobRequest) -> Result<ToolCommand, PredictionError> {
        let (program, mut args) = match &self.simulator {
            Some(sim) => (sim.program.clone(), sim.args.clone()),
            None => (self.resolve_executable()?, Vec::new()),
        };

        args.extend([
            "-i".into(),
            request.in_dir.clone().into_os_string(),
            "-o".into(),
            request.out_dir.clone().into_os_string(),
            "-d".into(),
            request.dataset.clone().into(),
            "-c".into(),
            request.config.clone().into(),
            "-f".into(),
            request.folds.clone().into(),
        ]);

        Ok(ToolCommand { program, args })
    }
}

fn find_in_path(paths: &OsString) -> Option<PathBuf> {
    let mut names = vec![files::PREDICT_EXECUTABLE.to_string()];
    if cfg!(windows) {
        names.insert(0, format!("{}.exe", files::PREDICT_EXECUTABLE));
    }

    env::split_paths(paths)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// A resolved program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs the external segmentation tool once and streams its progress.
#[derive(Debug, Clone)]
pub struct PredictionExecutor {
    config: ExecutorConfig,
    cancel: CancellationToken,
}

impl PredictionExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling `token` terminates a running tool; the run then fails with [`PredictionError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs the tool for `request`, blocking (asynchronously) until it exits.
    ///
    /// Every output line is appended to `predict_progress.log` in the output
    /// directory and fed through a [`ProgressThrottle`]. On success the tool's
    /// bookkeeping files are removed from the output directory.
    pub async fn run(
        &self,
        request: &JobRequest,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), PredictionError> {
        self.run_observed(request, |_| {}, on_progress).await
    }

    /// Like [`run`](Self::run), additionally reporting the child's process id once spawned.
    pub async fn run_observed<F>(
        &self,
        request: &JobRequest,
        on_spawn: F,
        on_progress: &mut ProgressFn<'_>,
    ) -> Result<(), PredictionError>
    where
        F: FnOnce(Option<u32>) + Send,
    {
        let command = self.config.command(request)?;
        tokio::fs::create_dir_all(&request.out_dir).await?;

        let mut log = open_progress_log(&request.out_dir).await;

        info!("Running {command}");
        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PredictionError::ToolNotFound(format!(
                "Cannot start {}: {e}",
                command.program.display()
            )),
            _ => PredictionError::Io(e),
        })?;
        on_spawn(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("tool stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("tool stderr was not captured"))?;

        let mut lines = futures::stream::select(
            FramedRead::new(stdout, ToolLineCodec),
            FramedRead::new(stderr, ToolLineCodec),
        );
        let mut throttle = ProgressThrottle::new(self.config.throttle);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    terminate(&mut child).await;
                    return Err(PredictionError::Cancelled);
                }
                next = lines.next() => match next {
                    Some(Ok(line)) => {
                        if let Some(writer) = log.as_mut() {
                            if let Err(e) = write_log_line(writer, &line).await {
                                warn!("Failed to write progress log: {e}");
                                log = None;
                            }
                        }
                        if let Some(update) = throttle.observe(&line, Instant::now()) {
                            on_progress(&update);
                        }
                    }
                    // The failing pipe ends here; the other one must still be drained.
                    Some(Err(e)) => warn!("Failed to read tool output: {e}"),
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            _ = self.cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(PredictionError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if let Some(mut writer) = log {
            if let Err(e) = writer.flush().await {
                warn!("Failed to flush progress log: {e}");
            }
        }

        check_status(status, &command)?;
        cleanup::remove_bookkeeping(&request.out_dir);
        Ok(())
    }
}

async fn open_progress_log(out_dir: &Path) -> Option<BufWriter<tokio::fs::File>> {
    let path = out_dir.join(files::PROGRESS_LOG);
    match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            warn!("Cannot open progress log {}: {e}", path.display());
            None
        }
    }
}

async fn write_log_line(writer: &mut BufWriter<tokio::fs::File>, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

async fn terminate(child: &mut Child) {
    debug!("Terminating cancelled tool process");
    if let Err(e) = child.kill().await {
        warn!("Failed to terminate tool process: {e}");
    }
}

fn check_status(status: ExitStatus, command: &ToolCommand) -> Result<(), PredictionError> {
    if status.success() {
        return Ok(());
    }
    Err(PredictionError::ToolExecutionFailed {
        code: status.code(),
        command: command.to_string(),
    })
}
