//! # Segflow Core
//!
//! Types and traits shared by the segflow crates.
//!
//! Defines the protocol used by clients and servers, and the batch logic that
//! drives a segmentation run independently of where cases are executed.
//!
//! - **[`Task`](task::Task)**: One run over an input directory, with its terminal status.
//! - **[`collect_cases`](case::collect_cases)**: Groups `.nii`/`.nii.gz` files into cases.
//! - **[`ProgressThrottle`](progress::ProgressThrottle)**: Turns raw tool output into rate-limited percentages.
//! - **[`CaseBackend`](traits::CaseBackend)**: Trait for executing a single case (locally or remotely).
//! - **[`BatchOrchestrator`](batch::BatchOrchestrator)**: Runs all cases and aggregates progress.

pub mod archive;
pub mod batch;
pub mod case;
pub mod cleanup;
pub mod constants;
pub mod error;
pub mod job;
pub mod progress;
pub mod task;
pub mod traits;

pub mod prelude {
    pub use super::batch::*;
    pub use super::case::*;
    pub use super::constants::*;
    pub use super::error::*;
    pub use super::job::*;
    pub use super::progress::*;
    pub use super::task::*;
    pub use super::traits::*;
}
