//! HTTP Client Factory
//!
//! Builds the pooled `reqwest::Client` used by remote providers.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a `reqwest::Client` with a connect timeout and an optional overall
/// request timeout.
///
/// Callers still wrap each call in their own deadline; the client timeout is
/// a backstop for a request that was never wrapped.
pub fn build_http_client(request_timeout: Option<Duration>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("chamado-agent/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| LlmError::provider(format!("failed to build HTTP client: {}", e)))
}
