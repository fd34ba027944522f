//! Guard error types
//!
//! A guard *rejection* is a verdict, not an error. `GuardError` covers the
//! cases where no verdict could be reached.

use std::time::Duration;

use chamado_core::ExecutionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The request was cancelled while the dry run was outstanding
    #[error("validation cancelled")]
    Cancelled,

    /// The dry run exceeded the planning timeout
    #[error("dry run timed out after {0:?}")]
    PlanTimeout(Duration),

    /// The engine could not be reached or refused the call
    #[error("dry run unavailable: {0}")]
    Transport(String),

    /// Invalid guard configuration
    #[error("guard configuration error: {0}")]
    Config(String),
}

impl GuardError {
    /// Map to the execution failure taxonomy used for user-facing answers.
    pub fn into_execution_error(self) -> ExecutionError {
        match self {
            GuardError::Cancelled => ExecutionError::cancelled(),
            GuardError::PlanTimeout(after) => {
                ExecutionError::timeout(format!("dry run exceeded {:?}", after))
            }
            GuardError::Transport(detail) | GuardError::Config(detail) => {
                ExecutionError::engine(detail)
            }
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
