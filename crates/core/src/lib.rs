//! Chamado Core
//!
//! Foundational types for the guarded query pipeline. This crate has no
//! dependency on the query engine, the language model or the async runtime.
//!
//! ## Module Organization
//!
//! - `error` - Core error types and the user-facing failure taxonomy
//! - `model` - Question, intent, candidates, verdicts, results and answers
//! - `context` - Per-request lifecycle owner (`RequestContext`)
//! - `telemetry` - Append-only request telemetry
//! - `builders` - Validated pipeline configuration

pub mod builders;
pub mod context;
pub mod error;
pub mod model;
pub mod telemetry;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult, ExecutionError, ExecutionErrorKind, PipelineFailure};

// ── Data Model ─────────────────────────────────────────────────────────
pub use model::{
    Answer, AnswerSource, CandidateOrigin, CandidateRecord, CellValue, Column, ColumnType,
    DateWindow, ExecutionResult, Intent, QueryCandidate, Question, RejectionReason,
    ValidationVerdict,
};

// ── Request Lifecycle ──────────────────────────────────────────────────
pub use context::RequestContext;
pub use telemetry::{Stage, StageTiming, Telemetry};

// ── Configuration ──────────────────────────────────────────────────────
pub use builders::{PipelineConfig, PipelineConfigBuilder};
