//! Shared fakes for the integration tests.
//!
//! - `ScriptedEngine` estimates bytes from the DATE literals in the SQL
//!   (days in window x bytes per day) and answers `run` with a fixed output
//! - `ScriptedProvider` replays queued completions, split by output format

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chamado_agent::clock::FixedClock;
use chamado_agent::Pipeline;
use chamado_core::{CellValue, Column, ColumnType, PipelineConfig};
use chamado_engine::{
    PlanOutput, PlanResult, RunError, RunLimits, RunOutput, RunResult, TabularEngine,
};
use chamado_llm::{
    CompletionRequest, LlmError, LlmProvider, LlmResult, OutputFormat, ProviderConfig,
};
use chrono::NaiveDate;
use regex::Regex;
use tokio_util::sync::CancellationToken;

/// Processing date used by every scenario.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

// ============================================================================
// ScriptedEngine
// ============================================================================

pub struct ScriptedEngine {
    bytes_per_day: u64,
    output: RunOutput,
    run_error: Mutex<Option<RunError>>,
    pub plan_calls: Mutex<Vec<String>>,
    pub run_calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(bytes_per_day: u64, output: RunOutput) -> Arc<Self> {
        Arc::new(Self {
            bytes_per_day,
            output,
            run_error: Mutex::new(None),
            plan_calls: Mutex::new(Vec::new()),
            run_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(bytes_per_day: u64, error: RunError) -> Arc<Self> {
        Arc::new(Self {
            bytes_per_day,
            output: RunOutput::default(),
            run_error: Mutex::new(Some(error)),
            plan_calls: Mutex::new(Vec::new()),
            run_calls: Mutex::new(Vec::new()),
        })
    }

    /// Estimate for `sql` in bytes.
    pub fn estimate(&self, sql: &str) -> u64 {
        window_days(sql).map_or(u64::MAX / 2, |days| days * self.bytes_per_day)
    }

    pub fn plans(&self) -> Vec<String> {
        self.plan_calls.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<String> {
        self.run_calls.lock().unwrap().clone()
    }
}

/// Days between the earliest and latest DATE literal, inclusive.
pub fn window_days(sql: &str) -> Option<u64> {
    let re = Regex::new(r"DATE '(\d{4}-\d{2}-\d{2})'").unwrap();
    let dates: Vec<NaiveDate> = re
        .captures_iter(sql)
        .filter_map(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
        .collect();
    let min = dates.iter().min()?;
    let max = dates.iter().max()?;
    Some((*max - *min).num_days() as u64 + 1)
}

#[async_trait]
impl TabularEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn plan(&self, sql: &str) -> PlanResult<PlanOutput> {
        self.plan_calls.lock().unwrap().push(sql.to_string());
        Ok(PlanOutput {
            bytes_estimated: self.estimate(sql),
        })
    }

    async fn run(
        &self,
        sql: &str,
        _limits: RunLimits,
        cancel: &CancellationToken,
    ) -> RunResult<RunOutput> {
        self.run_calls.lock().unwrap().push(sql.to_string());
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        if let Some(err) = self.run_error.lock().unwrap().take() {
            return Err(err);
        }
        let mut output = self.output.clone();
        output.bytes_processed = self.estimate(sql);
        Ok(output)
    }
}

pub fn count_output(total: i64) -> RunOutput {
    RunOutput {
        columns: vec![Column::new("total", ColumnType::Integer)],
        rows: vec![vec![CellValue::Int(total)]],
        bytes_processed: 0,
        elapsed_ms: 40,
        truncated: false,
    }
}

pub fn ranking_output(label: &str, rows: &[(&str, i64)]) -> RunOutput {
    RunOutput {
        columns: vec![
            Column::new(label, ColumnType::Text),
            Column::new("total", ColumnType::Integer),
        ],
        rows: rows
            .iter()
            .map(|(name, total)| vec![CellValue::Text(name.to_string()), CellValue::Int(*total)])
            .collect(),
        bytes_processed: 0,
        elapsed_ms: 75,
        truncated: false,
    }
}

// ============================================================================
// ScriptedProvider
// ============================================================================

pub struct ScriptedProvider {
    config: ProviderConfig,
    sql_replies: Mutex<VecDeque<LlmResult<String>>>,
    text_replies: Mutex<VecDeque<LlmResult<String>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            config: ProviderConfig::default(),
            sql_replies: Mutex::new(VecDeque::new()),
            text_replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn sql(self, reply: &str) -> Self {
        self.sql_replies
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
        self
    }

    pub fn text(self, reply: &str) -> Self {
        self.text_replies
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
        self
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let queue = match request.constraints.format {
            OutputFormat::SqlStatement => &self.sql_replies,
            OutputFormat::Text => &self.text_replies,
        };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::malformed("no scripted reply")))
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

// ============================================================================
// Pipeline assembly
// ============================================================================

pub fn pipeline(config: PipelineConfig, engine: Arc<ScriptedEngine>) -> Pipeline {
    Pipeline::builder(config, engine)
        .clock(Arc::new(FixedClock(today())))
        .build()
        .unwrap()
}

pub fn pipeline_with_model(
    config: PipelineConfig,
    engine: Arc<ScriptedEngine>,
    provider: Arc<ScriptedProvider>,
) -> Pipeline {
    Pipeline::builder(config, engine)
        .provider(provider)
        .clock(Arc::new(FixedClock(today())))
        .build()
        .unwrap()
}
