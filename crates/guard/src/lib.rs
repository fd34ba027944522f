//! Chamado Guard
//!
//! Proves a candidate query is a single read-only statement, references only
//! allowed tables, bounds the partition column and fits the byte budget,
//! before it is ever executed.
//!
//! ## Module Organization
//!
//! - `statement` - normalization and statement shape rules
//! - `references` - table references and partition filter detection
//! - `guard` - the phased `Guard` and the `ValidatedQuery` token
//! - `error` - `GuardError`

pub mod error;
pub mod guard;
pub mod references;
pub mod statement;

pub use error::{GuardError, GuardResult};
pub use guard::{
    Guard, GuardConfig, GuardOutcome, GuardPhase, LocalRejection, PhaseResult, ValidatedQuery,
};
pub use statement::{check_shape, has_forbidden_keyword, normalize, StaticRejection, FORBIDDEN_KEYWORDS};
