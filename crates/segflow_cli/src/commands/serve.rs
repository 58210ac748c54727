//! Serve command - run the remote job API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use segflow_server::{SegflowServer, SegflowServerConfig};
use tracing::{info, warn};

use super::ToolArgs;

/// Arguments for the serve command
#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "NNUNET_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "NNUNET_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Jobs allowed to run at the same time
    #[arg(long, default_value_t = 2)]
    pub max_jobs: usize,

    /// Seconds an uploaded job's result is kept waiting for its download
    #[arg(long, default_value_t = 600)]
    pub download_timeout: u64,

    /// Parent directory for uploaded jobs (defaults to the system temp dir)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    #[command(flatten)]
    pub tool: ToolArgs,
}

impl ServeArgs {
    fn server_config(&self) -> SegflowServerConfig {
        SegflowServerConfig {
            executor: self.tool.executor_config(),
            download_timeout: Duration::from_secs(self.download_timeout),
            max_concurrent_jobs: self.max_jobs.max(1),
            simulate_all: self.tool.simulate,
            storage_dir: self.storage_dir.clone(),
            ..Default::default()
        }
    }
}

/// Run the serve command until interrupted.
pub async fn run(args: &ServeArgs) -> Result<()> {
    let server = SegflowServer::new(args.server_config());
    let state = server.state().clone();
    let app = server.build();

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);
    if args.tool.simulate {
        warn!("Simulation mode: every job is simulated");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutting down");
    state.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
