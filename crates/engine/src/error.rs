//! Engine error types
//!
//! `PlanError` covers dry-run planning, `RunError` covers real execution.
//! Both keep the engine's own message as internal detail; callers map them
//! to user-facing kinds before anything reaches an answer.

use thiserror::Error;

/// Failure of a dry-run planning call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The engine refused to plan the statement (syntax, unknown column, ...)
    #[error("query rejected by planner: {message}")]
    Invalid { message: String },

    /// The planning call did not finish within its deadline
    #[error("planning timed out")]
    Timeout,

    /// Network, authentication or unexpected server failure
    #[error("transport error during planning: {message}")]
    Transport { message: String },
}

impl PlanError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether the failure is a verdict on the statement itself.
    pub fn is_statement_error(&self) -> bool {
        matches!(self, PlanError::Invalid { .. })
    }
}

/// Failure of a real execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The job did not complete within the execution timeout
    #[error("execution timed out")]
    Timeout,

    /// The caller cancelled the request while the job was running
    #[error("execution cancelled")]
    Cancelled,

    /// The engine stopped the job because it would bill more than the cap
    #[error("bytes billed limit exceeded: {message}")]
    BytesBilledExceeded { message: String },

    /// The job failed on the engine side
    #[error("engine error: {message}")]
    Engine { message: String },

    /// Network, authentication or decoding failure
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl RunError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
pub type RunResult<T> = Result<T, RunError>;
