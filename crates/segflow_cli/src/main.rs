//! Segflow CLI - batch nnU-Net segmentation, locally or through a job server.

use std::future::Future;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;

use commands::{Cli, Commands, ExitCode};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let exit_code = match cli.command {
        Commands::Run(ref args) => report(block_on(commands::run::run(args))),
        Commands::Serve(ref args) => {
            report(block_on(commands::serve::run(args)).map(|()| ExitCode::Success))
        }
        Commands::Health(ref args) => report(block_on(commands::health::run(args))),
        Commands::Presets => {
            commands::presets::run();
            ExitCode::Success
        }
        Commands::MockPredict(ref args) => {
            report(commands::mock_predict::run(args).map(|()| ExitCode::Success))
        }
    };

    exit_code.into()
}

fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

fn report(result: Result<ExitCode>) -> ExitCode {
    result.unwrap_or_else(|e| {
        eprintln!("error: {e:#}");
        ExitCode::Error
    })
}
