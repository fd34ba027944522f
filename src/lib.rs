//! Chamado Agent
//!
//! Answers natural-language questions about the 1746 service-request dataset
//! by generating, validating and executing read-only SQL against a remote
//! engine. It includes:
//! - Intent routing and query synthesis (templates, optional language model)
//! - The Guard pipeline (from `chamado-guard`) and a bounded executor
//! - Response synthesis grounded on the result rows
//! - The request state machine that ties them together
//! - Settings, logging and the CLI entry points

pub mod acceptance;
pub mod clock;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod response;
pub mod router;
pub mod schema;
pub mod settings;
pub mod synthesizer;
pub mod utils;

pub use pipeline::{AskResponse, Pipeline, PipelineBuilder, PipelineError, PIPELINE_VERSION};
pub use settings::Settings;
pub use utils::error::{AppError, AppResult};
