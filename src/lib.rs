//! # Segflow
//!
//! Batch orchestration of `nnUNetv2_predict` segmentation runs.
//!
//! A run takes a directory of `.nii`/`.nii.gz` images, groups them into
//! cases, predicts every case either with a local nnU-Net install or through
//! a remote job server, and writes one `<case id>.nii.gz` per case.
//!
//! This crate serves as an entry point, re-exporting the core logic and
//! optionally including the local executor, server, and client via feature flags.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **`local`** | Runs the prediction tool in-process (`segflow_local`). |
//! | **`server`** | Includes the Axum-based job server (`segflow_server`), implies `local`. |
//! | **`client`** | Includes the HTTP client and remote case backend (`segflow_client`). |
//!
//! ## Example: Local batch
//!
//! ```toml
//! [dependencies]
//! segflow = { version = "0.3", features = ["local"] }
//! ```
//!
//! ```rust,ignore
//! use segflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = CaseRunner::new(PredictionExecutor::new(ExecutorConfig::from_env()));
//!     let mut task = Task::new("./study/images");
//!
//!     BatchOrchestrator::new(runner)
//!         .run(
//!             &mut task,
//!             &TaskTagSpec::default(),
//!             |p: &ProgressUpdate| println!("{}% {}", p.percent, p.line),
//!             |_: &str, _: &std::path::Path| {},
//!         )
//!         .await;
//!
//!     println!("{:?}: {:?}", task.status, task.output_dir);
//! }
//! ```

pub use segflow_core::*;

#[cfg(feature = "local")]
pub mod local {
    pub use segflow_local::*;
}

#[cfg(feature = "server")]
pub mod server {
    pub use segflow_server::*;
}

#[cfg(feature = "client")]
pub mod client {
    pub use segflow_client::*;
}

pub mod prelude {
    pub use segflow_core::prelude::*;

    #[cfg(feature = "local")]
    pub use segflow_local::{CaseRunner, ExecutorConfig, PredictionExecutor, SimulatorCommand};

    #[cfg(feature = "server")]
    pub use segflow_server::prelude::*;

    #[cfg(feature = "client")]
    pub use segflow_client::{RemoteCaseBackend, SegflowClient};
}
