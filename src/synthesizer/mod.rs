//! Query Synthesizer
//!
//! Turns a data question into a `QueryCandidate`. The first attempt may use
//! the language model; every other path is a deterministic template. Retries
//! react to the previous rejection:
//!
//! | Last rejection | Next candidate |
//! |----------------|----------------|
//! | `over_budget` | template over half the previous window (same end date) |
//! | anything else | template over the same window |
//!
//! The stated window always wins over the defensive one, and a single-day
//! window cannot be narrowed.

pub mod llm;
pub mod question;
pub mod templates;

use std::sync::Arc;

use chamado_core::{
    CandidateOrigin, CandidateRecord, DateWindow, PipelineConfig, QueryCandidate, Question,
    RejectionReason,
};
use chamado_llm::LlmProvider;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::schema::SchemaCatalog;
use crate::utils::text::sql_preview;
use llm::TranslationFailure;

pub use question::{parse, parse_window, Dimension, ParsedQuestion, QueryShape};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    /// No query shape fits the question
    #[error("unsupported question: {0}")]
    Unsupported(String),

    /// `over_budget` on a window that cannot be narrowed further
    #[error("window cannot be narrowed below one day")]
    WindowExhausted,

    #[error("synthesis cancelled")]
    Cancelled,
}

impl SynthesisError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;

// ============================================================================
// Synthesizer
// ============================================================================

/// A candidate plus how it was obtained.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub candidate: QueryCandidate,
    /// The model was tried and the template was used instead
    pub llm_fallback: bool,
    /// The window was not stated in the question
    pub defensive_window: bool,
}

pub struct QuerySynthesizer {
    config: PipelineConfig,
    catalog: SchemaCatalog,
    provider: Arc<dyn LlmProvider>,
    clock: Arc<dyn Clock>,
}

impl QuerySynthesizer {
    pub fn new(
        config: PipelineConfig,
        catalog: SchemaCatalog,
        provider: Arc<dyn LlmProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            catalog,
            provider,
            clock,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// The trailing window applied when the question states none.
    pub fn defensive_window(&self) -> DateWindow {
        DateWindow::trailing(self.clock.today(), self.config.defensive_window_days)
    }

    /// Window for this attempt and whether it is defensive.
    fn window_for(
        &self,
        question: &Question,
        prior: &[CandidateRecord],
    ) -> SynthesisResult<(DateWindow, bool)> {
        let stated = parse_window(question, self.clock.today())?;
        let defensive = stated.is_none();
        let base = stated.unwrap_or_else(|| self.defensive_window());

        let Some(last) = prior.last() else {
            return Ok((base, defensive));
        };
        match last.verdict.reason() {
            Some(RejectionReason::OverBudget) => last
                .candidate
                .window
                .halved()
                .map(|w| (w, defensive))
                .ok_or(SynthesisError::WindowExhausted),
            _ => Ok((last.candidate.window, defensive)),
        }
    }

    /// Produce the candidate for `attempt` (1-based), given earlier records.
    pub async fn synthesize(
        &self,
        question: &Question,
        attempt: u32,
        prior: &[CandidateRecord],
        cancel: &CancellationToken,
    ) -> SynthesisResult<Synthesis> {
        if cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }
        let (window, defensive_window) = self.window_for(question, prior)?;

        let mut llm_fallback = false;
        if attempt == 1 && prior.is_empty() && self.config.llm_enabled {
            match llm::translate(
                self.provider.as_ref(),
                question,
                &window,
                &self.config,
                &self.catalog,
                cancel,
            )
            .await
            {
                Ok(translation) => {
                    return Ok(Synthesis {
                        candidate: QueryCandidate {
                            sql: translation.sql,
                            window,
                            tables: translation.tables,
                            attempt,
                            origin: CandidateOrigin::Llm {
                                model: self.provider.model().to_string(),
                            },
                            rationale: "language model translation".to_string(),
                        },
                        llm_fallback: false,
                        defensive_window,
                    });
                }
                Err(TranslationFailure::Cancelled) => return Err(SynthesisError::Cancelled),
                Err(TranslationFailure::Unavailable) => {
                    tracing::debug!(attempt, "model unavailable, using templates");
                    llm_fallback = true;
                }
                Err(failure) => {
                    tracing::warn!(attempt, reason = %failure, "model synthesis unavailable, using templates");
                    llm_fallback = true;
                }
            }
        }

        let parsed = parse(question, self.clock.today())?;
        let template = templates::render(&parsed, &window, &self.catalog, &self.config)?;
        let rationale = match prior.last().and_then(|r| r.verdict.reason()) {
            Some(RejectionReason::OverBudget) => {
                format!("{} template, window narrowed to {} day(s)", template.name, window.days())
            }
            Some(reason) => format!("{} template, regenerated after {}", template.name, reason),
            None => format!("{} template", template.name),
        };
        tracing::debug!(
            attempt,
            template = template.name,
            window = %window,
            sql = %sql_preview(&template.sql),
            "template candidate"
        );
        Ok(Synthesis {
            candidate: QueryCandidate {
                sql: template.sql,
                window,
                tables: template.tables,
                attempt,
                origin: CandidateOrigin::template(template.name),
                rationale,
            },
            llm_fallback,
            defensive_window,
        })
    }
}
