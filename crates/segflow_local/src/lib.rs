//! Local execution of `nnUNetv2_predict`.
//!
//! [`PredictionExecutor`] spawns the tool and streams its progress,
//! [`CaseRunner`] stages a single case around it and implements
//! [`CaseBackend`](segflow_core::traits::CaseBackend) for batch runs.

mod lines;

pub mod executor;
pub mod runner;
pub mod simulator;

pub use executor::{ExecutorConfig, PredictionExecutor, SimulatorCommand, ToolCommand};
pub use runner::CaseRunner;
pub use simulator::MockPredict;
