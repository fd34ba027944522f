//! Core Error Types
//!
//! Two families live here:
//!
//! - `CoreError`: programming and configuration errors (invalid builder
//!   values, violated request-context invariants). These never reach an end
//!   user as text.
//! - The user-facing failure taxonomy (`PipelineFailure`, `ExecutionError`):
//!   every external error is mapped into one of these kinds before it crosses
//!   into the response synthesizer, so raw engine messages never leak.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RejectionReason;

/// Core error type for the chamado workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A request-context invariant was violated
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invariant error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

// ============================================================================
// Failure taxonomy
// ============================================================================

/// Why an execution attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// The engine did not finish within the execution timeout
    Timeout,
    /// The engine reported an error or could not be reached
    EngineError,
    /// The request was cancelled while the query was in flight
    Cancelled,
    /// The query would have processed more bytes than the cap allows
    ByteCapExceeded,
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionErrorKind::Timeout => write!(f, "timeout"),
            ExecutionErrorKind::EngineError => write!(f, "engine_error"),
            ExecutionErrorKind::Cancelled => write!(f, "cancelled"),
            ExecutionErrorKind::ByteCapExceeded => write!(f, "byte_cap_exceeded"),
        }
    }
}

/// Execution failure with an internal detail string.
///
/// `detail` is for logs only. The response synthesizer renders from `kind`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("execution failed ({kind}): {detail}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub detail: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Timeout, detail)
    }

    pub fn engine(detail: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::EngineError, detail)
    }

    pub fn cancelled() -> Self {
        Self::new(ExecutionErrorKind::Cancelled, "request cancelled")
    }

    pub fn byte_cap(detail: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::ByteCapExceeded, detail)
    }
}

/// Terminal failure of a data request, as seen by the response synthesizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineFailure {
    /// No query shape matches the question
    #[error("unsupported question")]
    UnsupportedQuestion,

    /// The guard rejected every candidate up to the retry cap
    #[error("retries exhausted after {attempts} attempt(s), last rejection: {last_reason}")]
    RetriesExhausted {
        attempts: u32,
        last_reason: RejectionReason,
    },

    /// Planning or execution against the engine failed
    #[error("{0}")]
    Execution(ExecutionError),
}

impl PipelineFailure {
    /// Short machine-readable code for logs and telemetry.
    pub fn code(&self) -> String {
        match self {
            PipelineFailure::UnsupportedQuestion => "unsupported_question".to_string(),
            PipelineFailure::RetriesExhausted { last_reason, .. } => {
                format!("retries_exhausted:{}", last_reason)
            }
            PipelineFailure::Execution(err) => format!("execution:{}", err.kind),
        }
    }
}

/// Convert CoreError to a string
impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
