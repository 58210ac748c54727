//! # Remote Batch Example
//!
//! Segments a directory of images on a running Segflow server, one upload per case.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --example simulated_server --features server
//! cargo run --example remote_batch --features client -- ./study/images
//! ```

use segflow::prelude::*;
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let input = env::args().nth(1).unwrap_or_else(|| "./images".to_string());
    let url = env::var("NNUNET_REMOTE_API").unwrap_or_else(|_| "http://localhost:8000".into());

    let client = SegflowClient::new(url);
    let health = client.health().await.unwrap();
    println!("Server ok: {}, nnU-Net available: {}", health.ok, health.nnunet);

    let mut task = Task::new(input);
    BatchOrchestrator::new(RemoteCaseBackend::new(client))
        .run(
            &mut task,
            &TaskTagSpec::default(),
            |p: &ProgressUpdate| println!("[{:>3}%] {}", p.percent, p.line),
            |case_id: &str, path: &Path| println!("{case_id} -> {}", path.display()),
        )
        .await;

    match task.status {
        TaskStatus::Success => println!("Results in {:?}", task.output_dir),
        _ => eprintln!("Failed: {}", task.error.unwrap_or_default()),
    }
}
