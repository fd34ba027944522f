//! Chamado LLM
//!
//! Provider abstraction for the optional language-model capability:
//! - OpenAI-compatible chat completions (non-streaming)
//! - Local stub used when the capability is disabled or unconfigured
//!
//! Also includes the HTTP client factory.

pub mod http_client;
pub mod openai;
pub mod provider;
pub mod stub;
pub mod types;

// Re-export main types
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::{create_provider, LlmProvider};
pub use stub::LocalStubProvider;
pub use types::*;
