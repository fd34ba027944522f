//! Tabular Engine Trait
//!
//! The remote query engine as seen by the pipeline: a planning call that
//! estimates cost without reading data, and an execution call bounded by a
//! timeout and a byte cap. Executions observe a cancellation token so a
//! cancelled request also stops the remote job.

use std::time::Duration;

use async_trait::async_trait;
use chamado_core::{CellValue, Column};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PlanResult, RunResult};

/// Outcome of a successful dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub bytes_estimated: u64,
}

/// Resource limits for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub timeout: Duration,
    /// Maximum bytes the engine may bill for the job
    pub byte_cap: u64,
    /// Maximum rows fetched back
    pub max_rows: usize,
}

/// Rows and accounting of one execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunOutput {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<CellValue>>,
    pub bytes_processed: u64,
    pub elapsed_ms: u64,
    /// Set when `max_rows` cut the result short
    pub truncated: bool,
}

/// Trait implemented by every query engine backend.
#[async_trait]
pub trait TabularEngine: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Plan `sql` without executing it.
    async fn plan(&self, sql: &str) -> PlanResult<PlanOutput>;

    /// Execute `sql` under `limits`.
    ///
    /// Once `cancel` fires the backend stops any job it started and returns
    /// `RunError::Cancelled`.
    async fn run(
        &self,
        sql: &str,
        limits: RunLimits,
        cancel: &CancellationToken,
    ) -> RunResult<RunOutput>;
}
