//! Phased Query Guard
//!
//! `Guard` proves a candidate is safe to run, in five sequential phases:
//! 1. STATIC - statement shape, local only
//! 2. REFERENCE - every table is on the allow-list
//! 3. FILTER - the fact table is bounded on its partition column
//! 4. DRY_RUN - the engine plans the query and estimates bytes
//! 5. BUDGET - the estimate is within the configured ceiling
//!
//! The pipeline short-circuits on the first rejection, so an unsafe statement
//! never costs a remote call. An accepted candidate yields a
//! `ValidatedQuery`, the only value the executor accepts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chamado_core::{DateWindow, PipelineConfig, QueryCandidate, RejectionReason, ValidationVerdict};
use chamado_engine::{PlanError, TabularEngine};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{GuardError, GuardResult};
use crate::references::{referenced_tables, PartitionFilter};
use crate::statement::{check_shape, normalize};

// ============================================================================
// Phases
// ============================================================================

/// Guard execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPhase {
    Static,
    Reference,
    Filter,
    DryRun,
    Budget,
}

impl std::fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardPhase::Static => write!(f, "static"),
            GuardPhase::Reference => write!(f, "reference"),
            GuardPhase::Filter => write!(f, "filter"),
            GuardPhase::DryRun => write!(f, "dry_run"),
            GuardPhase::Budget => write!(f, "budget"),
        }
    }
}

/// Result from a single guard phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: GuardPhase,
    pub passed: bool,
    pub duration_ms: u64,
}

/// Outcome of validating a candidate.
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    pub verdict: ValidationVerdict,
    /// Present only when the verdict is `accepted`
    pub validated: Option<ValidatedQuery>,
    /// Phases that ran, in order
    pub phases: Vec<PhaseResult>,
}

impl GuardOutcome {
    /// The phase that rejected the candidate, if any.
    pub fn rejected_at(&self) -> Option<GuardPhase> {
        self.phases.iter().find(|p| !p.passed).map(|p| p.phase)
    }
}

// ============================================================================
// ValidatedQuery
// ============================================================================

/// A candidate that passed every guard phase.
///
/// Fields are private and there is no public constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    window: DateWindow,
    attempt: u32,
    estimated_bytes: u64,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Guard settings derived from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub max_bytes_scanned: u64,
    pub planning_timeout: Duration,
    pub fact_table: String,
    /// Lowercased allow-list of tables
    pub allowed_tables: Vec<String>,
    pub partition_column: String,
}

impl From<&PipelineConfig> for GuardConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_bytes_scanned: config.max_bytes_scanned,
            planning_timeout: config.planning_timeout,
            fact_table: config.fact_table.to_ascii_lowercase(),
            allowed_tables: vec![
                config.fact_table.to_ascii_lowercase(),
                config.dimension_table.to_ascii_lowercase(),
            ],
            partition_column: config.partition_column.clone(),
        }
    }
}

/// A rejection from one of the local phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRejection {
    pub phase: GuardPhase,
    pub reason: RejectionReason,
    pub detail: String,
}

impl LocalRejection {
    fn new(phase: GuardPhase, reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            phase,
            reason,
            detail: detail.into(),
        }
    }
}

/// Static plus dry-run validator over a `TabularEngine`.
pub struct Guard {
    engine: Arc<dyn TabularEngine>,
    config: GuardConfig,
    partition_filter: PartitionFilter,
}

/// Records phase results in order.
struct PhaseLog {
    phases: Vec<PhaseResult>,
    started: Instant,
}

impl PhaseLog {
    fn new() -> Self {
        Self {
            phases: Vec::with_capacity(5),
            started: Instant::now(),
        }
    }

    fn record(&mut self, phase: GuardPhase, passed: bool) {
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.phases.push(PhaseResult {
            phase,
            passed,
            duration_ms,
        });
        self.started = Instant::now();
    }
}

impl Guard {
    pub fn new(engine: Arc<dyn TabularEngine>, config: GuardConfig) -> GuardResult<Self> {
        let partition_filter = PartitionFilter::new(&config.partition_column)
            .map_err(|e| GuardError::Config(format!("partition filter pattern: {}", e)))?;
        Ok(Self {
            engine,
            config,
            partition_filter,
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Run the local phases only (static, reference, filter).
    ///
    /// Returns the normalized SQL when all of them pass.
    pub fn check_local(&self, sql: &str) -> Result<String, LocalRejection> {
        let normalized = normalize(sql);

        check_shape(&normalized)
            .map_err(|r| LocalRejection::new(GuardPhase::Static, r.reason, r.detail))?;

        let tables = referenced_tables(&normalized).ok_or_else(|| {
            LocalRejection::new(
                GuardPhase::Reference,
                RejectionReason::UnknownTable,
                "reference rules unavailable",
            )
        })?;
        if tables.is_empty() {
            return Err(LocalRejection::new(
                GuardPhase::Reference,
                RejectionReason::UnknownTable,
                "no allowed table referenced",
            ));
        }
        if let Some(unknown) = tables
            .iter()
            .find(|t| !self.config.allowed_tables.iter().any(|a| a == *t))
        {
            return Err(LocalRejection::new(
                GuardPhase::Reference,
                RejectionReason::UnknownTable,
                format!("table {} is not allowed", unknown),
            ));
        }

        if tables.iter().any(|t| *t == self.config.fact_table)
            && !self.partition_filter.is_bounded(&normalized)
        {
            return Err(LocalRejection::new(
                GuardPhase::Filter,
                RejectionReason::MissingFilter,
                format!("no predicate bounds {}", self.partition_filter.column()),
            ));
        }

        Ok(normalized)
    }

    /// Validate a candidate.
    ///
    /// Rejections are returned as verdicts. `Err` is reserved for cancellation
    /// and for a dry run that could not be performed at all.
    pub async fn validate(
        &self,
        candidate: &QueryCandidate,
        cancel: &CancellationToken,
    ) -> GuardResult<GuardOutcome> {
        let mut log = PhaseLog::new();

        // Phases 1-3: local
        match self.check_local(&candidate.sql) {
            Ok(_) => {
                log.record(GuardPhase::Static, true);
                log.record(GuardPhase::Reference, true);
                log.record(GuardPhase::Filter, true);
            }
            Err(LocalRejection {
                phase,
                reason,
                detail,
            }) => {
                for passed in [GuardPhase::Static, GuardPhase::Reference, GuardPhase::Filter]
                    .into_iter()
                    .take_while(|p| *p != phase)
                {
                    log.record(passed, true);
                }
                log.record(phase, false);
                tracing::info!(
                    attempt = candidate.attempt,
                    phase = %phase,
                    reason = %reason,
                    detail = %detail,
                    "candidate rejected locally"
                );
                return Ok(GuardOutcome {
                    verdict: ValidationVerdict::rejected(reason, detail),
                    validated: None,
                    phases: log.phases,
                });
            }
        }

        // Phase 4: dry run
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GuardError::Cancelled),
            planned = tokio::time::timeout(self.config.planning_timeout, self.engine.plan(&candidate.sql)) => planned,
        };
        let estimate = match plan {
            Err(_) => return Err(GuardError::PlanTimeout(self.config.planning_timeout)),
            Ok(Err(PlanError::Invalid { message })) => {
                log.record(GuardPhase::DryRun, false);
                tracing::info!(
                    attempt = candidate.attempt,
                    reason = %RejectionReason::SyntaxError,
                    detail = %message,
                    "dry run rejected candidate"
                );
                return Ok(GuardOutcome {
                    verdict: ValidationVerdict::rejected(RejectionReason::SyntaxError, message),
                    validated: None,
                    phases: log.phases,
                });
            }
            Ok(Err(PlanError::Timeout)) => {
                return Err(GuardError::PlanTimeout(self.config.planning_timeout))
            }
            Ok(Err(PlanError::Transport { message })) => return Err(GuardError::Transport(message)),
            Ok(Ok(output)) => output.bytes_estimated,
        };
        log.record(GuardPhase::DryRun, true);

        // Phase 5: budget
        if estimate > self.config.max_bytes_scanned {
            log.record(GuardPhase::Budget, false);
            tracing::info!(
                attempt = candidate.attempt,
                reason = %RejectionReason::OverBudget,
                bytes = estimate,
                ceiling = self.config.max_bytes_scanned,
                "candidate over budget"
            );
            return Ok(GuardOutcome {
                verdict: ValidationVerdict::Rejected {
                    reason: RejectionReason::OverBudget,
                    detail: format!(
                        "estimated {} bytes exceeds ceiling {}",
                        estimate, self.config.max_bytes_scanned
                    ),
                    estimated_bytes: Some(estimate),
                },
                validated: None,
                phases: log.phases,
            });
        }
        log.record(GuardPhase::Budget, true);

        tracing::debug!(attempt = candidate.attempt, bytes = estimate, "candidate accepted");
        Ok(GuardOutcome {
            verdict: ValidationVerdict::Accepted {
                estimated_bytes: estimate,
            },
            validated: Some(ValidatedQuery {
                sql: candidate.sql.clone(),
                window: candidate.window,
                attempt: candidate.attempt,
                estimated_bytes: estimate,
            }),
            phases: log.phases,
        })
    }
}
