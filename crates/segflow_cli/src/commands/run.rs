//! Run command - segment a directory of images, locally or on a job server.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use clap::builder::BoolishValueParser;
use segflow_client::{RemoteCaseBackend, SegflowClient};
use segflow_core::batch::BatchOrchestrator;
use segflow_core::constants::defaults;
use segflow_core::progress::ProgressUpdate;
use segflow_core::task::{Task, TaskStatus, TaskTagSpec};
use segflow_core::traits::CaseBackend;
use segflow_local::{CaseRunner, PredictionExecutor, SimulatorCommand};
use tracing::info;

use super::{ExitCode, ToolArgs};

/// Arguments for the run command
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Directory containing .nii/.nii.gz images
    pub input: PathBuf,

    /// Output directory (defaults to `seg` next to the input directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Named preset, by label or dataset id
    #[arg(long, conflicts_with = "dataset")]
    pub preset: Option<String>,

    /// Dataset id passed to the model
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Model configuration
    #[arg(short, long, default_value = defaults::CONFIGURATION)]
    pub config: String,

    /// Folds to use
    #[arg(short, long, default_value = defaults::FOLDS)]
    pub folds: String,

    /// Base URL of a job server; cases run there instead of locally
    #[arg(long, env = "NNUNET_REMOTE_API")]
    pub remote: Option<String>,

    /// Use the server's always-simulated test endpoints
    #[arg(long, env = "USE_REMOTE_TEST_ENDPOINTS", value_parser = BoolishValueParser::new())]
    pub test_endpoints: bool,

    /// Parent directory for per-case scratch directories
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    #[command(flatten)]
    pub tool: ToolArgs,
}

impl RunArgs {
    fn tag(&self) -> Result<TaskTagSpec> {
        let tag = match (&self.preset, &self.dataset) {
            (Some(preset), _) => match TaskTagSpec::preset(preset) {
                Some(tag) => tag,
                None => bail!("Unknown preset '{preset}', see `segflow presets`"),
            },
            (None, Some(dataset)) => TaskTagSpec::new(dataset.as_str()),
            (None, None) => TaskTagSpec::default(),
        };
        Ok(tag
            .with_configuration(self.config.as_str())
            .with_folds(self.folds.as_str()))
    }

    fn task(&self) -> Task {
        let task = Task::new(&self.input);
        match &self.output {
            Some(output) => task.with_output_dir(output),
            None => task,
        }
    }

    fn local_backend(&self) -> Result<CaseRunner> {
        let mut config = self.tool.executor_config();
        if self.tool.simulate {
            let exe = std::env::current_exe().context("Failed to locate the segflow binary")?;
            config = config.with_simulator(SimulatorCommand::new(exe).arg("mock-predict"));
        }

        let runner = CaseRunner::new(PredictionExecutor::new(config));
        Ok(match &self.scratch_dir {
            Some(dir) => runner.with_scratch_dir(dir),
            None => runner,
        })
    }

    fn remote_backend(&self, url: &str) -> RemoteCaseBackend {
        let client =
            SegflowClient::new(url).with_test_endpoints(self.test_endpoints || self.tool.simulate);
        let backend = RemoteCaseBackend::new(client);
        match &self.scratch_dir {
            Some(dir) => backend.with_scratch_dir(dir),
            None => backend,
        }
    }
}

/// Run the run command. The finished task is printed to stdout as JSON.
pub async fn run(args: &RunArgs) -> Result<ExitCode> {
    if !args.input.is_dir() {
        bail!("{} is not a directory", args.input.display());
    }

    let tag = args.tag()?;
    let mut task = args.task();
    info!(
        "Segmenting {} with dataset {} ({}, folds {})",
        args.input.display(),
        tag.dataset,
        tag.configuration,
        tag.folds
    );

    match &args.remote {
        Some(url) => {
            info!("Running cases on {url}");
            execute(args.remote_backend(url), &mut task, &tag).await;
        }
        None => execute(args.local_backend()?, &mut task, &tag).await,
    }

    println!("{}", serde_json::to_string_pretty(&task)?);

    if task.status == TaskStatus::Success {
        Ok(ExitCode::Success)
    } else {
        eprintln!(
            "error: {}",
            task.error.as_deref().unwrap_or("segmentation failed")
        );
        Ok(ExitCode::TaskFailed)
    }
}

async fn execute<B: CaseBackend>(backend: B, task: &mut Task, tag: &TaskTagSpec) {
    BatchOrchestrator::new(backend)
        .run(
            task,
            tag,
            |update: &ProgressUpdate| eprintln!("[{:>3}%] {}", update.percent, update.line),
            |case_id: &str, path: &Path| info!("Case {case_id} done: {}", path.display()),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(["segflow", "run"].iter().chain(args)).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn preset_label_selects_dataset() {
        let tag = parse(&["images", "--preset", "Pre Seg (007)"]).tag().unwrap();
        assert_eq!(tag.dataset, "007");
        assert_eq!(tag.name.as_deref(), Some("Pre Seg"));
        assert_eq!(tag.configuration, defaults::CONFIGURATION);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(parse(&["images", "--preset", "nope"]).tag().is_err());
    }

    #[test]
    fn explicit_model_arguments() {
        let tag = parse(&["images", "-d", "042", "-c", "2d", "-f", "0 1"])
            .tag()
            .unwrap();
        assert_eq!(tag.dataset, "042");
        assert_eq!(tag.configuration, "2d");
        assert_eq!(tag.folds, "0 1");
    }

    #[test]
    fn preset_and_dataset_conflict() {
        let result =
            Cli::try_parse_from(["segflow", "run", "images", "--preset", "101", "-d", "7"]);
        assert!(result.is_err());
    }
}
