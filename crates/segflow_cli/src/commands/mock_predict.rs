//! Mock-predict command - a deterministic stand-in for nnUNetv2_predict.
//!
//! Accepts the same arguments as the real tool so the local executor can run
//! it unchanged when simulation is enabled.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use segflow_core::constants::defaults;
use segflow_local::MockPredict;

/// Arguments for the mock-predict command
#[derive(Args, Clone)]
pub struct MockPredictArgs {
    /// Input directory
    #[arg(short = 'i')]
    pub input: PathBuf,

    /// Output directory
    #[arg(short = 'o')]
    pub output: PathBuf,

    #[arg(short = 'd', default_value = defaults::DATASET)]
    pub dataset: String,

    #[arg(short = 'c', default_value = defaults::CONFIGURATION)]
    pub config: String,

    #[arg(short = 'f', num_args = 1.., default_value = defaults::FOLDS)]
    pub folds: Vec<String>,

    /// Milliseconds between progress steps
    #[arg(long, env = "SEGFLOW_MOCK_STEP_MS", default_value_t = 50)]
    pub step_ms: u64,
}

/// Simulate a prediction, writing progress to stdout.
pub fn run(args: &MockPredictArgs) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    MockPredict::new(&args.input, &args.output)
        .with_step(Duration::from_millis(args.step_ms))
        .run(&mut stdout)
        .with_context(|| format!("Mock prediction into {} failed", args.output.display()))
}
