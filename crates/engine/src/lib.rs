//! Chamado Engine
//!
//! The remote tabular query engine behind a trait:
//! - `engine` - `TabularEngine` trait, plan/run inputs and outputs
//! - `error` - `PlanError` / `RunError`
//! - `bigquery` - BigQuery REST v2 implementation
//! - `convert` - decoding of engine rows into typed cells

pub mod bigquery;
pub mod convert;
pub mod engine;
pub mod error;

pub use bigquery::{BigQueryClient, BigQueryConfig, ConfigError};
pub use engine::{PlanOutput, RunLimits, RunOutput, TabularEngine};
pub use error::{PlanError, PlanResult, RunError, RunResult};
