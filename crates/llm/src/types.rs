//! LLM Types
//!
//! Request, configuration and error types shared by all providers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// OpenAI-compatible chat completions endpoint
    OpenAI,
    /// Deterministic local stub (no network, always unavailable)
    Stub,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Stub => write!(f, "stub"),
        }
    }
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The provider type
    pub provider: ProviderType,
    /// API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name to use
    pub model: String,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenAI,
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Expected shape of the completion text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// A single SQL statement, no prose
    SqlStatement,
    /// Free text
    Text,
}

/// Output constraints for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConstraints {
    pub format: OutputFormat,
    /// Optional per-request token cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Optional temperature override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_override: Option<f32>,
}

impl CompletionConstraints {
    pub fn sql() -> Self {
        Self {
            format: OutputFormat::SqlStatement,
            max_tokens: Some(400),
            temperature_override: Some(0.0),
        }
    }

    pub fn text(max_tokens: u32) -> Self {
        Self {
            format: OutputFormat::Text,
            max_tokens: Some(max_tokens),
            temperature_override: None,
        }
    }
}

/// A single-turn completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    pub constraints: CompletionConstraints,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, constraints: CompletionConstraints) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            constraints,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Why a completion produced no text.
///
/// Callers fall back to templates on every variant; the split only decides
/// how loudly the fallback is logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// No model behind this provider (disabled, no API key, stub)
    #[error("model unavailable: {message}")]
    Unavailable { message: String },

    /// The provider gave up before answering
    #[error("model timed out")]
    Timeout,

    /// The provider throttled the call
    #[error("model rate limited")]
    RateLimited { retry_after: Option<u32> },

    /// The provider answered, but not with usable text
    #[error("malformed completion: {message}")]
    Malformed { message: String },

    /// Refused by the provider or lost in transit
    #[error("provider failure: {message}")]
    Provider { message: String },
}

impl LlmError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }
}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_default() {
        let config = ProviderConfig::default();
        assert_eq!(config.provider, ProviderType::OpenAI);
        assert_eq!(config.max_tokens, 512);
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_provider_config_serialization() {
        let config = ProviderConfig {
            provider: ProviderType::OpenAI,
            api_key: Some("sk-test".to_string()),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 220,
            temperature: 0.2,
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("base_url"));
        let parsed: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.model, "gpt-4o-mini");
        assert_eq!(parsed.max_tokens, 220);
    }

    #[test]
    fn test_provider_type_display() {
        assert_eq!(ProviderType::OpenAI.to_string(), "openai");
        assert_eq!(ProviderType::Stub.to_string(), "stub");
    }

    #[test]
    fn test_sql_constraints_are_deterministic() {
        let c = CompletionConstraints::sql();
        assert_eq!(c.format, OutputFormat::SqlStatement);
        assert_eq!(c.temperature_override, Some(0.0));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            LlmError::provider("HTTP 503: overloaded").to_string(),
            "provider failure: HTTP 503: overloaded"
        );
        assert_eq!(
            LlmError::RateLimited { retry_after: Some(20) }.to_string(),
            "model rate limited"
        );
        assert_eq!(
            LlmError::unavailable("API key not configured").to_string(),
            "model unavailable: API key not configured"
        );
    }
}
