//! BigQuery REST client
//!
//! Implements `TabularEngine` over the BigQuery v2 REST API:
//!
//! - `jobs.query` with `dryRun: true` for planning
//! - `jobs.query` + `jobs.getQueryResults` polling and paging for execution
//! - `jobs.cancel` when an execution runs past its deadline or its request
//!   is cancelled
//!
//! Every job carries `maximumBytesBilled` and the configured labels.
//! Authentication is a bearer access token supplied by configuration.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::convert::{decode_columns, decode_rows, RawRow, TableSchema};
use crate::engine::{PlanOutput, RunLimits, RunOutput, TabularEngine};
use crate::error::{PlanError, PlanResult, RunError, RunResult};

/// Default BigQuery REST endpoint
pub const BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Upper bound for a single server-side wait inside one HTTP call.
const MAX_POLL_WAIT: Duration = Duration::from_secs(10);

/// Deadline for the best-effort cancel call.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for the BigQuery client.
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// Project that runs (and is billed for) the jobs
    pub project_id: String,
    pub location: Option<String>,
    pub access_token: String,
    pub base_url: String,
    pub labels: BTreeMap<String, String>,
    pub use_query_cache: bool,
}

impl BigQueryConfig {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "chamado-agent".to_string());
        labels.insert("env".to_string(), "dev".to_string());
        Self {
            project_id: project_id.into(),
            location: None,
            access_token: access_token.into(),
            base_url: BIGQUERY_API_URL.to_string(),
            labels,
            use_query_cache: true,
        }
    }
}

/// Invalid client configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid BigQuery configuration: {0}")]
pub struct ConfigError(pub String);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<RawRow>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    total_bytes_processed: Option<String>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

impl QueryResponse {
    fn bytes_processed(&self) -> Option<u64> {
        self.total_bytes_processed
            .as_deref()
            .and_then(|b| b.parse::<u64>().ok())
    }

    /// Byte estimate of a dry run. A response without one cannot be budgeted.
    fn plan_output(&self) -> PlanResult<PlanOutput> {
        self.bytes_processed()
            .map(|bytes_estimated| PlanOutput { bytes_estimated })
            .ok_or_else(|| PlanError::transport("dry run returned no byte estimate"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Reasons and message of an error response body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiFailure {
    status: u16,
    reasons: Vec<String>,
    message: String,
}

impl ApiFailure {
    fn parse(status: u16, body: &str) -> Self {
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
        let reasons = envelope
            .error
            .errors
            .iter()
            .filter_map(|e| e.reason.clone())
            .collect();
        let message = if envelope.error.message.is_empty() {
            body.chars().take(300).collect()
        } else {
            envelope.error.message
        };
        Self {
            status,
            reasons,
            message,
        }
    }

    fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }

    fn into_plan_error(self) -> PlanError {
        match self.status {
            400 | 404 => PlanError::invalid(self.message),
            _ => PlanError::transport(format!("HTTP {}: {}", self.status, self.message)),
        }
    }

    fn into_run_error(self) -> RunError {
        if self.has_reason("bytesBilledLimitExceeded") {
            return RunError::BytesBilledExceeded {
                message: self.message,
            };
        }
        match self.status {
            400 | 404 => RunError::engine(self.message),
            _ => RunError::transport(format!("HTTP {}: {}", self.status, self.message)),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// BigQuery implementation of `TabularEngine`.
pub struct BigQueryClient {
    config: BigQueryConfig,
    client: reqwest::Client,
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig) -> Result<Self, ConfigError> {
        if config.project_id.trim().is_empty() {
            return Err(ConfigError("project id is empty".to_string()));
        }
        if config.access_token.trim().is_empty() {
            return Err(ConfigError("access token is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("chamado-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BigQueryConfig {
        &self.config
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/projects/{}/queries",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }

    fn results_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.queries_url(), job_id)
    }

    fn cancel_url(&self, job_id: &str) -> String {
        format!(
            "{}/projects/{}/jobs/{}/cancel",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id,
            job_id
        )
    }

    /// Body of a `jobs.query` request.
    fn query_body(
        &self,
        sql: &str,
        dry_run: bool,
        byte_cap: Option<u64>,
        wait: Duration,
        max_results: Option<usize>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "dryRun": dry_run,
            "useQueryCache": self.config.use_query_cache,
            "timeoutMs": wait.as_millis().min(u128::from(u32::MAX)) as u64,
            "labels": self.config.labels,
        });
        if let Some(cap) = byte_cap {
            // int64 fields travel as strings
            body["maximumBytesBilled"] = serde_json::json!(cap.to_string());
        }
        if let Some(location) = self.config.location.as_deref() {
            body["location"] = serde_json::json!(location);
        }
        if let Some(max) = max_results {
            body["maxResults"] = serde_json::json!(max);
        }
        body
    }

    /// Send a request and return `(status, body)`; `Err` is a transport message.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(u16, String), String> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok((status, body))
    }

    async fn get_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
        wait: Duration,
        max_results: usize,
    ) -> RunResult<QueryResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("timeoutMs", wait.as_millis().to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(location) = job.location.as_deref().or(self.config.location.as_deref()) {
            query.push(("location", location.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let request = self.client.get(self.results_url(&job.job_id)).query(&query);
        let (status, body) = self.send(request).await.map_err(RunError::transport)?;
        if status != 200 {
            return Err(ApiFailure::parse(status, &body).into_run_error());
        }
        serde_json::from_str(&body)
            .map_err(|e| RunError::transport(format!("failed to parse results: {}", e)))
    }

    /// Best-effort cancellation of a job that outlived its deadline or its
    /// request.
    async fn cancel(&self, job: &JobReference) {
        let mut request = self.client.post(self.cancel_url(&job.job_id));
        if let Some(location) = job.location.as_deref().or(self.config.location.as_deref()) {
            request = request.query(&[("location", location)]);
        }
        match tokio::time::timeout(CANCEL_TIMEOUT, self.send(request)).await {
            Ok(Ok((200, _))) => tracing::info!(job_id = %job.job_id, "cancelled job"),
            Ok(Ok((status, _))) => {
                tracing::warn!(job_id = %job.job_id, status, "job cancel request refused")
            }
            Ok(Err(e)) => tracing::warn!(job_id = %job.job_id, error = %e, "job cancel failed"),
            Err(_) => tracing::warn!(job_id = %job.job_id, "job cancel timed out"),
        }
    }

    /// Execute with an absolute deadline. On expiry or cancellation the job is
    /// cancelled.
    async fn run_until(
        &self,
        sql: &str,
        limits: RunLimits,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RunResult<RunOutput> {
        let started = Instant::now();
        let remaining = |now: Instant| deadline.saturating_duration_since(now);

        let body = self.query_body(
            sql,
            false,
            Some(limits.byte_cap),
            remaining(started).min(MAX_POLL_WAIT),
            Some(limits.max_rows),
        );
        let request = self.client.post(self.queries_url()).json(&body);
        let sent = tokio::select! {
            biased;
            // no job reference yet, so there is nothing to cancel remotely
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            sent = tokio::time::timeout(remaining(started), self.send(request)) => sent,
        };
        let (status, text) = match sent {
            Ok(sent) => sent.map_err(RunError::transport)?,
            Err(_) => return Err(RunError::Timeout),
        };
        if status != 200 {
            return Err(ApiFailure::parse(status, &text).into_run_error());
        }
        let mut page: QueryResponse = serde_json::from_str(&text)
            .map_err(|e| RunError::transport(format!("failed to parse response: {}", e)))?;

        let job = page.job_reference.clone();

        // Poll until the job completes, then follow page tokens up to `max_rows`.
        let mut schema: Option<TableSchema> = None;
        let mut raw_rows: Vec<RawRow> = Vec::new();
        let mut bytes_processed = 0u64;
        let mut truncated = false;
        loop {
            if let Some(error) = page.errors.first() {
                let failure = ApiFailure {
                    status: 400,
                    reasons: page.errors.iter().filter_map(|e| e.reason.clone()).collect(),
                    message: error.message.clone().unwrap_or_default(),
                };
                return Err(failure.into_run_error());
            }

            let complete = page.job_complete.unwrap_or(true);
            let mut next_token = None;
            if complete {
                if let Some(bytes) = page.bytes_processed() {
                    bytes_processed = bytes_processed.max(bytes);
                }
                if schema.is_none() {
                    schema = page.schema.take();
                }
                raw_rows.append(&mut page.rows);
                if raw_rows.len() > limits.max_rows {
                    raw_rows.truncate(limits.max_rows);
                    truncated = true;
                }
                match page.page_token.take() {
                    Some(token) if raw_rows.len() < limits.max_rows => next_token = Some(token),
                    Some(_) => {
                        truncated = true;
                        break;
                    }
                    None => break,
                }
            }

            let Some(job) = job.as_ref().filter(|j| !j.job_id.is_empty()) else {
                return Err(RunError::transport("incomplete job without a job reference"));
            };
            if cancel.is_cancelled() {
                self.cancel(job).await;
                return Err(RunError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                self.cancel(job).await;
                return Err(RunError::Timeout);
            }
            let wait = remaining(now).min(MAX_POLL_WAIT);
            let fetch = self.get_results(
                job,
                next_token.as_deref(),
                wait,
                limits.max_rows.saturating_sub(raw_rows.len()).max(1),
            );
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.cancel(job).await;
                    return Err(RunError::Cancelled);
                }
                fetched = tokio::time::timeout(remaining(now), fetch) => fetched,
            };
            page = match fetched {
                Ok(result) => result?,
                Err(_) => {
                    self.cancel(job).await;
                    return Err(RunError::Timeout);
                }
            };
        }

        let schema = schema.unwrap_or_default();
        let rows = decode_rows(&schema, &raw_rows)?;
        Ok(RunOutput {
            columns: decode_columns(&schema),
            rows,
            bytes_processed,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            truncated,
        })
    }
}

#[async_trait]
impl TabularEngine for BigQueryClient {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    async fn plan(&self, sql: &str) -> PlanResult<PlanOutput> {
        let body = self.query_body(sql, true, None, MAX_POLL_WAIT, None);
        let request = self.client.post(self.queries_url()).json(&body);
        let (status, text) = self.send(request).await.map_err(PlanError::transport)?;
        if status != 200 {
            return Err(ApiFailure::parse(status, &text).into_plan_error());
        }
        let response: QueryResponse = serde_json::from_str(&text)
            .map_err(|e| PlanError::transport(format!("failed to parse dry run: {}", e)))?;
        response.plan_output()
    }

    async fn run(
        &self,
        sql: &str,
        limits: RunLimits,
        cancel: &CancellationToken,
    ) -> RunResult<RunOutput> {
        let deadline = Instant::now() + limits.timeout;
        self.run_until(sql, limits, deadline, cancel).await
    }
}
