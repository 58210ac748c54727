//! Health command - query a job server.

use anyhow::{Context, Result};
use clap::Args;
use segflow_client::SegflowClient;

use super::ExitCode;

/// Arguments for the health command
#[derive(Args, Clone)]
pub struct HealthArgs {
    /// Base URL of the job server
    #[arg(long, env = "NNUNET_REMOTE_API", default_value = "http://localhost:8000")]
    pub remote: String,
}

/// Print the server's health report as JSON.
///
/// Exits with a failure status when the server cannot run real predictions.
pub async fn run(args: &HealthArgs) -> Result<ExitCode> {
    let report = SegflowClient::new(args.remote.as_str())
        .health()
        .await
        .with_context(|| format!("Failed to reach {}", args.remote))?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.ok && report.nnunet {
        ExitCode::Success
    } else {
        ExitCode::TaskFailed
    })
}
