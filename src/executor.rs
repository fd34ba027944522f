//! Executor
//!
//! Runs a `ValidatedQuery` under the execution timeout and byte cap. Engine
//! failures are mapped to `ExecutionError` kinds here, so nothing past this
//! point sees an engine message except as log detail. The cancellation token
//! is handed to the engine, which stops its remote job when it fires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chamado_core::{ExecutionError, ExecutionResult, PipelineConfig};
use chamado_engine::{RunError, RunLimits, TabularEngine};
use chamado_guard::ValidatedQuery;
use tokio_util::sync::CancellationToken;

use crate::utils::text::sql_preview;

/// Slack on top of the engine-side timeout before the call is abandoned.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// How long a cancelled engine call may take to stop its job.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

pub struct Executor {
    engine: Arc<dyn TabularEngine>,
    limits: RunLimits,
}

impl Executor {
    pub fn new(engine: Arc<dyn TabularEngine>, config: &PipelineConfig) -> Self {
        Self {
            engine,
            limits: RunLimits {
                timeout: config.execution_timeout,
                byte_cap: config.max_bytes_scanned,
                max_rows: config.max_result_rows,
            },
        }
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    pub async fn execute(
        &self,
        query: &ValidatedQuery,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::cancelled());
        }
        let started = Instant::now();
        tracing::info!(
            engine = self.engine.name(),
            attempt = query.attempt(),
            bytes = query.estimated_bytes(),
            sql = %sql_preview(query.sql()),
            "executing query"
        );

        let outer = self.limits.timeout + TIMEOUT_GRACE;
        let run = tokio::time::timeout(outer, self.engine.run(query.sql(), self.limits, cancel));
        let abandon = async {
            cancel.cancelled().await;
            tokio::time::sleep(CANCEL_GRACE).await;
        };
        let ran = tokio::select! {
            ran = run => ran,
            _ = abandon => {
                tracing::warn!(engine = self.engine.name(), "engine ignored cancellation");
                return Err(ExecutionError::cancelled());
            }
        };

        let output = match ran {
            Err(_) => {
                return Err(ExecutionError::timeout(format!(
                    "no answer within {:?}",
                    outer
                )))
            }
            Ok(Err(err)) => return Err(map_run_error(err)),
            Ok(Ok(output)) => output,
        };

        if output.bytes_processed > self.limits.byte_cap {
            return Err(ExecutionError::byte_cap(format!(
                "processed {} bytes, cap {}",
                output.bytes_processed, self.limits.byte_cap
            )));
        }
        if output.truncated {
            tracing::warn!(
                rows = output.rows.len(),
                max_rows = self.limits.max_rows,
                "result truncated to row cap"
            );
        }

        let elapsed_ms = if output.elapsed_ms > 0 {
            output.elapsed_ms
        } else {
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
        };
        tracing::info!(
            rows = output.rows.len(),
            bytes = output.bytes_processed,
            elapsed_ms,
            "query finished"
        );
        Ok(ExecutionResult::new(
            output.columns,
            output.rows,
            elapsed_ms,
            output.bytes_processed,
        ))
    }
}

fn map_run_error(err: RunError) -> ExecutionError {
    match err {
        RunError::Timeout => ExecutionError::timeout("engine reported timeout"),
        RunError::Cancelled => ExecutionError::cancelled(),
        RunError::BytesBilledExceeded { message } => ExecutionError::byte_cap(message),
        RunError::Engine { message } | RunError::Transport { message } => {
            ExecutionError::engine(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chamado_core::{
        CandidateOrigin, CellValue, Column, ColumnType, DateWindow, ExecutionErrorKind,
        QueryCandidate,
    };
    use chamado_engine::{PlanOutput, PlanResult, RunOutput, RunResult};
    use chamado_guard::{Guard, GuardConfig};
    use chrono::NaiveDate;

    struct OneShotEngine {
        run: Mutex<Option<RunResult<RunOutput>>>,
        delay: Option<Duration>,
        saw_cancel: AtomicBool,
    }

    #[async_trait]
    impl TabularEngine for OneShotEngine {
        fn name(&self) -> &'static str {
            "one-shot"
        }

        async fn plan(&self, _sql: &str) -> PlanResult<PlanOutput> {
            Ok(PlanOutput { bytes_estimated: 10 })
        }

        async fn run(
            &self,
            _sql: &str,
            _limits: RunLimits,
            cancel: &CancellationToken,
        ) -> RunResult<RunOutput> {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        self.saw_cancel.store(true, Ordering::SeqCst);
                        return Err(RunError::Cancelled);
                    }
                }
            }
            self.run
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(RunError::engine("already used")))
        }
    }

    fn engine(result: RunResult<RunOutput>, delay: Option<Duration>) -> Arc<OneShotEngine> {
        Arc::new(OneShotEngine {
            run: Mutex::new(Some(result)),
            delay,
            saw_cancel: AtomicBool::new(false),
        })
    }

    async fn validated(engine: Arc<OneShotEngine>) -> ValidatedQuery {
        let config = PipelineConfig::default();
        let guard = Guard::new(engine, GuardConfig::from(&config)).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 11, 28).unwrap();
        let candidate = QueryCandidate {
            sql: format!(
                "SELECT COUNT(1) AS total FROM `{}` WHERE data_particao = DATE '2024-11-28'",
                config.fact_table
            ),
            window: DateWindow::single_day(day),
            tables: vec![config.fact_table.clone()],
            attempt: 1,
            origin: CandidateOrigin::template("count"),
            rationale: "test".to_string(),
        };
        guard
            .validate(&candidate, &CancellationToken::new())
            .await
            .unwrap()
            .validated
            .unwrap()
    }

    fn count_output(total: i64, bytes: u64) -> RunOutput {
        RunOutput {
            columns: vec![Column::new("total", ColumnType::Integer)],
            rows: vec![vec![CellValue::Int(total)]],
            bytes_processed: bytes,
            elapsed_ms: 12,
            truncated: false,
        }
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let e = engine(Ok(count_output(0, 1_000)), None);
        let query = validated(e.clone()).await;
        let result = Executor::new(e, &PipelineConfig::default())
            .execute(&query, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.cell(0, 0), Some(&CellValue::Int(0)));
        assert_eq!(result.bytes_processed, 1_000);
        assert_eq!(result.elapsed_ms, 12);
    }

    #[tokio::test]
    async fn test_reported_bytes_over_cap() {
        let e = engine(Ok(count_output(1, 3_000_000_000)), None);
        let query = validated(e.clone()).await;
        let err = Executor::new(e, &PipelineConfig::default())
            .execute(&query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ByteCapExceeded);
    }

    #[tokio::test]
    async fn test_engine_errors_are_mapped() {
        let e = engine(
            Err(RunError::BytesBilledExceeded {
                message: "limit".into(),
            }),
            None,
        );
        let query = validated(e.clone()).await;
        let err = Executor::new(e, &PipelineConfig::default())
            .execute(&query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::ByteCapExceeded);

        let e = engine(Err(RunError::transport("reset")), None);
        let query = validated(e.clone()).await;
        let err = Executor::new(e, &PipelineConfig::default())
            .execute(&query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::EngineError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_engine_times_out() {
        let e = engine(Ok(count_output(1, 1)), Some(Duration::from_secs(3_600)));
        let query = validated(e.clone()).await;
        let err = Executor::new(e, &PipelineConfig::default())
            .execute(&query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let e = engine(Ok(count_output(1, 1)), Some(Duration::from_secs(3_600)));
        let query = validated(e.clone()).await;
        let token = CancellationToken::new();
        let executor = Executor::new(e.clone(), &PipelineConfig::default());
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let err = executor.execute(&query, &token).await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Cancelled);
        // the engine itself saw the cancellation and stopped its job
        assert!(e.saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_engine_cancellation_maps_to_cancelled() {
        let e = engine(Err(RunError::Cancelled), None);
        let query = validated(e.clone()).await;
        let err = Executor::new(e, &PipelineConfig::default())
            .execute(&query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_reaches_engine() {
        let e = engine(Ok(count_output(1, 1)), None);
        let query = validated(e.clone()).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = Executor::new(e.clone(), &PipelineConfig::default())
            .execute(&query, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Cancelled);
        assert!(e.run.lock().unwrap().is_some());
    }
}
