//! CLI command definitions and handlers.

pub mod health;
pub mod mock_predict;
pub mod presets;
pub mod run;
pub mod serve;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use segflow_local::ExecutorConfig;
use std::path::PathBuf;

/// Segflow - batch nnU-Net segmentation, locally or through a job server
#[derive(Parser)]
#[command(name = "segflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Segment every case in a directory of images
    Run(run::RunArgs),
    /// Serve the remote job API
    Serve(serve::ServeArgs),
    /// Query the health of a job server
    Health(health::HealthArgs),
    /// List the named model presets
    Presets,
    /// Stand-in for nnUNetv2_predict used in simulation mode
    #[command(hide = true)]
    MockPredict(mock_predict::MockPredictArgs),
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// The command ran but the segmentation task failed.
    TaskFailed,
    /// The command could not run.
    Error,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => Self::SUCCESS,
            ExitCode::TaskFailed => Self::from(1),
            ExitCode::Error => Self::from(2),
        }
    }
}

/// Where the prediction executable comes from.
#[derive(Args, Clone, Default)]
pub struct ToolArgs {
    /// Path to nnUNetv2_predict, bypassing the lookup
    #[arg(long, env = "NNUNET_PREDICT_EXE")]
    pub predict_exe: Option<PathBuf>,

    /// Conda environment containing nnU-Net v2
    #[arg(long, env = "NNUNET_CONDA_PREFIX")]
    pub conda_prefix: Option<PathBuf>,

    /// Replace nnUNetv2_predict with a built-in simulator
    #[arg(long, env = "USE_NNUNET_SIM", value_parser = BoolishValueParser::new())]
    pub simulate: bool,
}

impl ToolArgs {
    /// Environment defaults overridden by explicit flags.
    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::from_env();
        if let Some(exe) = &self.predict_exe {
            config.executable = Some(exe.clone());
        }
        if let Some(prefix) = &self.conda_prefix {
            config.conda_prefix = Some(prefix.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn explicit_flags_override_environment() {
        let tool = ToolArgs {
            predict_exe: Some("/opt/nnunet/predict".into()),
            conda_prefix: Some("/opt/conda/envs/seg".into()),
            simulate: false,
        };
        let config = tool.executor_config();
        assert_eq!(config.executable, Some(PathBuf::from("/opt/nnunet/predict")));
        assert_eq!(config.conda_prefix, Some(PathBuf::from("/opt/conda/envs/seg")));
    }
}
