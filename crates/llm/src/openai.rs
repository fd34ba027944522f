//! OpenAI Provider
//!
//! Non-streaming chat completions against an OpenAI-compatible endpoint.
//! One system message plus one user message per call.

use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{missing_api_key_error, parse_http_error, LlmProvider};
use super::types::{CompletionRequest, LlmError, LlmResult, OutputFormat, ProviderConfig};
use crate::http_client::build_http_client;

/// Default OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(None)?;
        Ok(Self { config, client })
    }

    /// Get the API base URL
    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL)
    }

    /// Build the request body for the API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let constraints = &request.constraints;
        let max_tokens = constraints
            .max_tokens
            .map_or(self.config.max_tokens, |cap| cap.min(self.config.max_tokens));
        let temperature = constraints
            .temperature_override
            .unwrap_or(self.config.temperature);

        let mut messages: Vec<serde_json::Value> = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": false,
            "messages": messages,
        });
        if constraints.format == OutputFormat::SqlStatement {
            body["n"] = serde_json::json!(1);
        }
        body
    }

    fn extract_text(response: OpenAIResponse) -> LlmResult<String> {
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::malformed("completion has no text"));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("openai"))?;

        let body = self.build_request_body(&request);

        let response = self
            .client
            .post(self.base_url())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());
        let body_text = response.text().await.map_err(transport_error)?;

        if status != 200 {
            return Err(parse_http_error(status, &body_text, retry_after, "openai"));
        }

        let openai_response: OpenAIResponse = serde_json::from_str(&body_text)
            .map_err(|e| LlmError::malformed(format!("unreadable response: {}", e)))?;

        tracing::debug!(
            model = %openai_response.model,
            finish_reason = ?openai_response.choices.first().and_then(|c| c.finish_reason.as_deref()),
            "openai completion received"
        );

        Self::extract_text(openai_response)
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::provider(e.to_string())
    }
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
