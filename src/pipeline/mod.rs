//! Guarded Query Pipeline
//!
//! Drives one question through the state machine in `state`:
//!
//! 1. Route the question (`data` or `chitchat`)
//! 2. Synthesize a candidate for the current attempt
//! 3. Validate it with the Guard; rejections loop back to 2 until the retry
//!    cap, then fail with `RetriesExhausted`
//! 4. Execute the validated query
//! 5. Render the answer
//!
//! Each request owns a fresh `RequestContext`; the pipeline itself holds no
//! per-request state and can be shared behind an `Arc`.

pub mod state;

use std::sync::Arc;
use std::time::Instant;

use chamado_core::{
    Answer, AnswerSource, CoreError, ExecutionErrorKind, Intent, PipelineConfig, PipelineFailure,
    Question, RequestContext, Stage,
};
use chamado_engine::TabularEngine;
use chamado_guard::{Guard, GuardConfig, GuardError};
use chamado_llm::{LlmProvider, LocalStubProvider};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::executor::Executor;
use crate::response::{RenderInput, ResponseSynthesizer};
use crate::router;
use crate::schema::SchemaCatalog;
use crate::synthesizer::{QuerySynthesizer, SynthesisError};
use crate::utils::text::truncate_for_log;
pub use state::{Outcome, PipelineState, StateKind};

/// Version reported in every response.
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_SUMMARY_TOKENS: u32 = 220;

// ============================================================================
// Errors & responses
// ============================================================================

/// Request-level errors. Every other failure becomes answer text.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The caller cancelled the request; no answer was produced
    #[error("request cancelled")]
    Cancelled,

    /// A request-context invariant or state transition was violated
    #[error(transparent)]
    Internal(#[from] CoreError),

    #[error("pipeline configuration error: {0}")]
    Config(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Caller-facing answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_estimated: Option<u64>,
    pub latency_ms: u64,
    pub pipeline_version: String,
    pub source: AnswerSource,
    pub request_id: Uuid,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl From<Answer> for AskResponse {
    fn from(answer: Answer) -> Self {
        let t = answer.telemetry;
        Self {
            answer_text: answer.text,
            sql_used: answer.sql_used,
            bytes_estimated: t.bytes_estimated,
            latency_ms: t.latency_ms,
            pipeline_version: t.pipeline_version,
            source: answer.source,
            request_id: t.request_id,
            attempts: t.attempts,
            failure: t.failure,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a `Pipeline` from configuration, an engine and optional parts.
pub struct PipelineBuilder {
    config: PipelineConfig,
    engine: Arc<dyn TabularEngine>,
    provider: Option<Arc<dyn LlmProvider>>,
    catalog: Option<SchemaCatalog>,
    clock: Option<Arc<dyn Clock>>,
    summary_max_tokens: u32,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig, engine: Arc<dyn TabularEngine>) -> Self {
        Self {
            config,
            engine,
            provider: None,
            catalog: None,
            clock: None,
            summary_max_tokens: DEFAULT_SUMMARY_TOKENS,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn summary_max_tokens(mut self, tokens: u32) -> Self {
        self.summary_max_tokens = tokens;
        self
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        let provider: Arc<dyn LlmProvider> = self
            .provider
            .unwrap_or_else(|| Arc::new(LocalStubProvider::new("no provider configured")));
        let catalog = self
            .catalog
            .unwrap_or_else(|| SchemaCatalog::builtin(&self.config));
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let guard = Guard::new(self.engine.clone(), GuardConfig::from(&self.config))
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let executor = Executor::new(self.engine, &self.config);
        let responder = ResponseSynthesizer::new(
            provider.clone(),
            self.config.llm_enabled,
            self.config.llm_timeout,
            self.summary_max_tokens,
        );
        let synthesizer =
            QuerySynthesizer::new(self.config.clone(), catalog, provider, clock);

        Ok(Pipeline {
            config: self.config,
            synthesizer,
            guard,
            executor,
            responder,
        })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    synthesizer: QuerySynthesizer,
    guard: Guard,
    executor: Executor,
    responder: ResponseSynthesizer,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig, engine: Arc<dyn TabularEngine>) -> PipelineBuilder {
        PipelineBuilder::new(config, engine)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        self.synthesizer.catalog()
    }

    /// Answer a question.
    pub async fn ask(&self, question: &str) -> PipelineResult<AskResponse> {
        self.ask_cancellable(question, &CancellationToken::new())
            .await
    }

    /// Answer a question, aborting the outstanding call when `cancel` fires.
    pub async fn ask_cancellable(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<AskResponse> {
        self.answer(question, cancel).await.map(AskResponse::from)
    }

    /// Full `Answer`, including telemetry.
    pub async fn answer(&self, question: &str, cancel: &CancellationToken) -> PipelineResult<Answer> {
        let mut ctx = RequestContext::new(Question::new(question), PIPELINE_VERSION);
        let request_id = ctx.telemetry().request_id;
        tracing::info!(
            %request_id,
            question = %truncate_for_log(ctx.question().as_str(), 200),
            "request received"
        );

        let mut state = PipelineState::Route;
        loop {
            if let PipelineState::Done { text, source } = state {
                let answer = ctx.into_answer(text, source);
                tracing::info!(
                    %request_id,
                    source = %answer.source,
                    attempts = answer.telemetry.attempts,
                    latency_ms = answer.telemetry.latency_ms,
                    failure = answer.telemetry.failure.as_deref().unwrap_or("none"),
                    "request answered"
                );
                return Ok(answer);
            }
            let from = state.kind();
            let next = self.step(state, &mut ctx, cancel).await?;
            let to = next.kind();
            if !from.can_reach(to) {
                return Err(CoreError::invariant(format!("illegal transition {} -> {}", from, to)).into());
            }
            tracing::trace!(%request_id, %from, %to, "transition");
            state = next;
        }
    }

    async fn step(
        &self,
        state: PipelineState,
        ctx: &mut RequestContext,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineState> {
        match state {
            PipelineState::Route => {
                let started = Instant::now();
                let intent = router::classify(ctx.question());
                ctx.set_intent(intent)?;
                ctx.telemetry_mut()
                    .record_stage(Stage::Route, 0, elapsed_ms(started));
                tracing::debug!(%intent, "routed");
                Ok(match intent {
                    Intent::Data => PipelineState::Synthesize { attempt: 1 },
                    Intent::Chitchat => PipelineState::Respond {
                        outcome: Outcome::Chitchat,
                    },
                })
            }

            PipelineState::Synthesize { attempt } => {
                let started = Instant::now();
                let synthesized = self
                    .synthesizer
                    .synthesize(ctx.question(), attempt, ctx.records(), cancel)
                    .await;
                ctx.telemetry_mut()
                    .record_stage(Stage::Synthesize, attempt, elapsed_ms(started));
                match synthesized {
                    Ok(s) => {
                        if s.llm_fallback {
                            ctx.telemetry_mut().record_llm_fallback();
                        }
                        Ok(PipelineState::Validate {
                            candidate: s.candidate,
                            defensive_window: s.defensive_window,
                        })
                    }
                    Err(SynthesisError::Cancelled) => Err(PipelineError::Cancelled),
                    Err(e) => {
                        tracing::info!(attempt, reason = %e, "no candidate for question");
                        Ok(PipelineState::Respond {
                            outcome: Outcome::Failure(PipelineFailure::UnsupportedQuestion),
                        })
                    }
                }
            }

            PipelineState::Validate {
                candidate,
                defensive_window,
            } => {
                let started = Instant::now();
                let attempt = candidate.attempt;
                let validated = self.guard.validate(&candidate, cancel).await;
                ctx.telemetry_mut()
                    .record_stage(Stage::Validate, attempt, elapsed_ms(started));
                let outcome = match validated {
                    Ok(outcome) => outcome,
                    Err(GuardError::Cancelled) => return Err(PipelineError::Cancelled),
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "dry run unavailable");
                        return Ok(PipelineState::Respond {
                            outcome: Outcome::Failure(PipelineFailure::Execution(
                                e.into_execution_error(),
                            )),
                        });
                    }
                };
                let reason = outcome.verdict.reason();
                ctx.record_candidate(candidate, outcome.verdict)?;
                match (outcome.validated, reason) {
                    (Some(query), _) => Ok(PipelineState::Execute {
                        query,
                        defensive_window,
                    }),
                    (None, Some(last_reason)) if attempt < self.config.max_attempts() => {
                        if last_reason.is_safety() {
                            tracing::warn!(attempt, reason = %last_reason, "unsafe candidate rejected, retrying synthesis");
                        } else {
                            tracing::info!(attempt, reason = %last_reason, "retrying synthesis");
                        }
                        Ok(PipelineState::Synthesize {
                            attempt: attempt + 1,
                        })
                    }
                    (None, last_reason) => Ok(PipelineState::Respond {
                        outcome: Outcome::Failure(PipelineFailure::RetriesExhausted {
                            attempts: attempt,
                            last_reason: last_reason.ok_or_else(|| {
                                CoreError::invariant("rejection without a reason")
                            })?,
                        }),
                    }),
                }
            }

            PipelineState::Execute {
                query,
                defensive_window,
            } => {
                let started = Instant::now();
                let executed = self.executor.execute(&query, cancel).await;
                ctx.telemetry_mut()
                    .record_stage(Stage::Execute, query.attempt(), elapsed_ms(started));
                match executed {
                    Ok(result) => {
                        ctx.set_result(result)?;
                        Ok(PipelineState::Respond {
                            outcome: Outcome::Success {
                                window: query.window(),
                                defensive_window,
                            },
                        })
                    }
                    Err(e) if e.kind == ExecutionErrorKind::Cancelled => {
                        Err(PipelineError::Cancelled)
                    }
                    Err(e) => {
                        tracing::warn!(kind = %e.kind, detail = %e.detail, "execution failed");
                        Ok(PipelineState::Respond {
                            outcome: Outcome::Failure(PipelineFailure::Execution(e)),
                        })
                    }
                }
            }

            PipelineState::Respond { outcome } => {
                let started = Instant::now();
                if let Outcome::Failure(failure) = &outcome {
                    ctx.telemetry_mut().record_failure(failure.code());
                }
                let rendered = {
                    let input = match &outcome {
                        Outcome::Chitchat => RenderInput::Chitchat {
                            question: ctx.question(),
                        },
                        Outcome::Success {
                            window,
                            defensive_window,
                        } => {
                            let result = ctx.result().ok_or_else(|| {
                                CoreError::invariant("success outcome without a result")
                            })?;
                            RenderInput::Success {
                                question: ctx.question(),
                                result,
                                window: *window,
                                defensive_window: *defensive_window,
                            }
                        }
                        Outcome::Failure(failure) => RenderInput::Failure { failure },
                    };
                    self.responder.render(input, cancel).await
                };
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                if rendered.llm_fallback {
                    ctx.telemetry_mut().record_llm_fallback();
                }
                ctx.telemetry_mut()
                    .record_stage(Stage::Respond, 0, elapsed_ms(started));
                Ok(PipelineState::Done {
                    text: rendered.text,
                    source: rendered.source,
                })
            }

            PipelineState::Done { .. } => Err(CoreError::invariant("step called on a finished request").into()),
        }
    }
}
