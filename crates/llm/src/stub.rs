//! Local Stub Provider
//!
//! Deterministic stand-in used when no language model is configured. It
//! never touches the network and always reports itself unavailable, which
//! routes every caller onto its deterministic template path.

use async_trait::async_trait;

use super::provider::LlmProvider;
use super::types::{CompletionRequest, LlmError, LlmResult, ProviderConfig, ProviderType};

pub struct LocalStubProvider {
    config: ProviderConfig,
    reason: String,
}

impl LocalStubProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            config: ProviderConfig {
                provider: ProviderType::Stub,
                model: "local-stub".to_string(),
                ..Default::default()
            },
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for LocalStubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn complete(&self, _request: CompletionRequest) -> LlmResult<String> {
        Err(LlmError::unavailable(self.reason.clone()))
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
