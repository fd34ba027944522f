//! LLM Provider Trait
//!
//! Defines the capability interface the pipeline uses for language
//! generation. The pipeline never depends on a concrete provider; it holds an
//! `Arc<dyn LlmProvider>` chosen by configuration.

use std::sync::Arc;

use async_trait::async_trait;

use super::openai::OpenAIProvider;
use super::stub::LocalStubProvider;
use super::types::{CompletionRequest, LlmError, LlmResult, ProviderConfig, ProviderType};

/// Trait that all LLM providers must implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Whether the provider can be called at all.
    ///
    /// A `false` here lets callers skip building prompts. `complete` must
    /// still fail with `LlmError::Unavailable` if called anyway.
    fn is_available(&self) -> bool {
        true
    }

    /// Run a single-turn completion and return the raw text.
    async fn complete(&self, request: CompletionRequest) -> LlmResult<String>;

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;
}

/// Select a provider for the given configuration.
///
/// A disabled flag, the stub provider type, or a missing API key all yield
/// the local stub, so the pipeline degrades to deterministic templates.
pub fn create_provider(config: &ProviderConfig, enabled: bool) -> LlmResult<Arc<dyn LlmProvider>> {
    if !enabled {
        tracing::info!("LLM disabled by configuration; using local stub");
        return Ok(Arc::new(LocalStubProvider::new("disabled by configuration")));
    }
    match config.provider {
        ProviderType::Stub => Ok(Arc::new(LocalStubProvider::new("stub provider selected"))),
        ProviderType::OpenAI => {
            if config.api_key.as_deref().map_or(true, str::is_empty) {
                tracing::warn!(
                    provider = %config.provider,
                    "LLM requested but no API key configured; using local stub"
                );
                return Ok(Arc::new(LocalStubProvider::new("API key not configured")));
            }
            let provider = OpenAIProvider::new(config.clone())?;
            tracing::info!(provider = "openai", model = %config.model, "LLM enabled");
            Ok(Arc::new(provider))
        }
    }
}

/// Error for a remote provider configured without an API key.
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::unavailable(format!("API key not configured for {}", provider))
}

/// Classify a non-200 provider response.
///
/// `retry_after` is the parsed `Retry-After` header, in seconds.
pub fn parse_http_error(
    status: u16,
    body: &str,
    retry_after: Option<u32>,
    provider: &str,
) -> LlmError {
    match status {
        401 | 403 => LlmError::provider(format!("{}: credentials refused (HTTP {})", provider, status)),
        408 | 504 => LlmError::Timeout,
        429 => LlmError::RateLimited { retry_after },
        _ => {
            let detail: String = body.chars().take(200).collect();
            LlmError::provider(format!("{}: HTTP {}: {}", provider, status, detail))
        }
    }
}
