//! Pipeline Configuration Builder
//!
//! The pipeline reads no ambient state. Budgets, timeouts and table names are
//! collected once into a `PipelineConfig` value at process start and passed
//! by reference into each component.
//!
//! The builder follows the usual pattern:
//! 1. Create with `::new()` or `::default()`
//! 2. Chain `.field(value)` calls
//! 3. Call `.build()` which validates and returns `CoreResult<PipelineConfig>`

use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Default fact table (service requests, partitioned by `data_particao`).
pub const DEFAULT_FACT_TABLE: &str = "datario.adm_central_atendimento_1746.chamado";
/// Default neighborhood dimension table.
pub const DEFAULT_DIMENSION_TABLE: &str = "datario.dados_mestres.bairro";
/// Default partition column of the fact table.
pub const DEFAULT_PARTITION_COLUMN: &str = "data_particao";

const DEFAULT_MAX_BYTES: u64 = 2_000_000_000;
const DEFAULT_WINDOW_DAYS: u32 = 365;
const DEFAULT_MAX_RETRIES: u32 = 2;
const MAX_WINDOW_DAYS: u32 = 3650;
const MAX_RETRIES_LIMIT: u32 = 5;

// ============================================================================
// PipelineConfig
// ============================================================================

/// Validated pipeline configuration (output of `PipelineConfigBuilder`).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ceiling for dry-run estimates and billed bytes at execution
    pub max_bytes_scanned: u64,
    pub execution_timeout: Duration,
    pub planning_timeout: Duration,
    pub llm_timeout: Duration,
    /// Length of the defensive window in days
    pub defensive_window_days: u32,
    pub max_synthesis_retries: u32,
    pub llm_enabled: bool,
    pub fact_table: String,
    pub dimension_table: String,
    pub partition_column: String,
    /// Upper bound on rows fetched from one execution
    pub max_result_rows: usize,
}

impl PipelineConfig {
    /// Total candidates a request may generate (first attempt + retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_synthesis_retries + 1
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_bytes_scanned: DEFAULT_MAX_BYTES,
            execution_timeout: Duration::from_secs(60),
            planning_timeout: Duration::from_secs(15),
            llm_timeout: Duration::from_secs(30),
            defensive_window_days: DEFAULT_WINDOW_DAYS,
            max_synthesis_retries: DEFAULT_MAX_RETRIES,
            llm_enabled: false,
            fact_table: DEFAULT_FACT_TABLE.to_string(),
            dimension_table: DEFAULT_DIMENSION_TABLE.to_string(),
            partition_column: DEFAULT_PARTITION_COLUMN.to_string(),
            max_result_rows: 10_000,
        }
    }
}

// ============================================================================
// PipelineConfigBuilder
// ============================================================================

/// Builder for pipeline configuration with validation at build time.
///
/// # Example
/// ```ignore
/// let config = PipelineConfigBuilder::new()
///     .max_bytes_scanned(500_000_000)
///     .defensive_window_days(180)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    max_bytes_scanned: Option<u64>,
    execution_timeout: Option<Duration>,
    planning_timeout: Option<Duration>,
    llm_timeout: Option<Duration>,
    defensive_window_days: Option<u32>,
    max_synthesis_retries: Option<u32>,
    llm_enabled: Option<bool>,
    fact_table: Option<String>,
    dimension_table: Option<String>,
    partition_column: Option<String>,
    max_result_rows: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the byte ceiling (must be > 0).
    pub fn max_bytes_scanned(mut self, bytes: u64) -> Self {
        self.max_bytes_scanned = Some(bytes);
        self
    }

    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn planning_timeout(mut self, timeout: Duration) -> Self {
        self.planning_timeout = Some(timeout);
        self
    }

    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = Some(timeout);
        self
    }

    /// Set the defensive window length (1..=3650 days).
    pub fn defensive_window_days(mut self, days: u32) -> Self {
        self.defensive_window_days = Some(days);
        self
    }

    /// Set the synthesis retry cap (<= 5).
    pub fn max_synthesis_retries(mut self, retries: u32) -> Self {
        self.max_synthesis_retries = Some(retries);
        self
    }

    pub fn llm_enabled(mut self, enabled: bool) -> Self {
        self.llm_enabled = Some(enabled);
        self
    }

    pub fn fact_table(mut self, table: impl Into<String>) -> Self {
        self.fact_table = Some(table.into());
        self
    }

    pub fn dimension_table(mut self, table: impl Into<String>) -> Self {
        self.dimension_table = Some(table.into());
        self
    }

    pub fn partition_column(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    pub fn max_result_rows(mut self, rows: usize) -> Self {
        self.max_result_rows = Some(rows);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> CoreResult<PipelineConfig> {
        let defaults = PipelineConfig::default();

        let max_bytes_scanned = self.max_bytes_scanned.unwrap_or(defaults.max_bytes_scanned);
        let execution_timeout = self.execution_timeout.unwrap_or(defaults.execution_timeout);
        let planning_timeout = self.planning_timeout.unwrap_or(defaults.planning_timeout);
        let llm_timeout = self.llm_timeout.unwrap_or(defaults.llm_timeout);
        let defensive_window_days = self
            .defensive_window_days
            .unwrap_or(defaults.defensive_window_days);
        let max_synthesis_retries = self
            .max_synthesis_retries
            .unwrap_or(defaults.max_synthesis_retries);
        let max_result_rows = self.max_result_rows.unwrap_or(defaults.max_result_rows);

        if max_bytes_scanned == 0 {
            return Err(CoreError::validation("max_bytes_scanned must be > 0"));
        }
        for (name, timeout) in [
            ("execution_timeout", execution_timeout),
            ("planning_timeout", planning_timeout),
            ("llm_timeout", llm_timeout),
        ] {
            if timeout.is_zero() {
                return Err(CoreError::validation(format!("{} must be > 0", name)));
            }
        }
        if defensive_window_days == 0 || defensive_window_days > MAX_WINDOW_DAYS {
            return Err(CoreError::validation(format!(
                "defensive_window_days must be between 1 and {}",
                MAX_WINDOW_DAYS
            )));
        }
        if max_synthesis_retries > MAX_RETRIES_LIMIT {
            return Err(CoreError::validation(format!(
                "max_synthesis_retries must be <= {}",
                MAX_RETRIES_LIMIT
            )));
        }
        if max_result_rows == 0 {
            return Err(CoreError::validation("max_result_rows must be > 0"));
        }

        let fact_table = non_empty(self.fact_table, defaults.fact_table, "fact_table")?;
        let dimension_table =
            non_empty(self.dimension_table, defaults.dimension_table, "dimension_table")?;
        let partition_column =
            non_empty(self.partition_column, defaults.partition_column, "partition_column")?;

        Ok(PipelineConfig {
            max_bytes_scanned,
            execution_timeout,
            planning_timeout,
            llm_timeout,
            defensive_window_days,
            max_synthesis_retries,
            llm_enabled: self.llm_enabled.unwrap_or(defaults.llm_enabled),
            fact_table,
            dimension_table,
            partition_column,
            max_result_rows,
        })
    }
}

fn non_empty(value: Option<String>, default: String, field: &str) -> CoreResult<String> {
    match value {
        Some(v) if v.trim().is_empty() => {
            Err(CoreError::validation(format!("{} cannot be empty", field)))
        }
        Some(v) => Ok(v.trim().to_string()),
        None => Ok(default),
    }
}
