//! Request Telemetry
//!
//! Append-only record of what happened during one request. Each stage adds
//! its own entries; nothing reads and resets them mid-request. The finished
//! record is attached to the `Answer`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage identifiers used in timing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Route,
    Synthesize,
    Validate,
    Execute,
    Respond,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Route => write!(f, "route"),
            Stage::Synthesize => write!(f, "synthesize"),
            Stage::Validate => write!(f, "validate"),
            Stage::Execute => write!(f, "execute"),
            Stage::Respond => write!(f, "respond"),
        }
    }
}

/// One timed stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    /// Attempt number for synthesize/validate entries, 0 otherwise
    pub attempt: u32,
    pub elapsed_ms: u64,
}

/// Telemetry context threaded through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub request_id: Uuid,
    pub pipeline_version: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageTiming>,
    /// Latest dry-run estimate
    pub bytes_estimated: Option<u64>,
    /// Bytes reported by the engine after execution
    pub bytes_processed: Option<u64>,
    /// Number of synthesis attempts made
    pub attempts: u32,
    /// Language-model calls that fell back to deterministic output
    pub llm_fallbacks: u32,
    /// Candidates rejected as unsafe (forbidden, multi-statement, ...)
    #[serde(default)]
    pub safety_rejections: u32,
    /// Failure code, when the request ended in a failure
    pub failure: Option<String>,
    /// Total latency, set when the request finishes
    pub latency_ms: u64,
}

impl Telemetry {
    pub fn new(pipeline_version: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            pipeline_version: pipeline_version.into(),
            started_at: Utc::now(),
            stages: Vec::new(),
            bytes_estimated: None,
            bytes_processed: None,
            attempts: 0,
            llm_fallbacks: 0,
            safety_rejections: 0,
            failure: None,
            latency_ms: 0,
        }
    }

    pub fn record_stage(&mut self, stage: Stage, attempt: u32, elapsed_ms: u64) {
        self.stages.push(StageTiming {
            stage,
            attempt,
            elapsed_ms,
        });
    }

    pub fn record_attempt(&mut self, attempt: u32) {
        self.attempts = self.attempts.max(attempt);
    }

    pub fn record_estimate(&mut self, bytes: u64) {
        self.bytes_estimated = Some(bytes);
    }

    pub fn record_processed(&mut self, bytes: u64) {
        self.bytes_processed = Some(bytes);
    }

    pub fn record_llm_fallback(&mut self) {
        self.llm_fallbacks += 1;
    }

    pub fn record_safety_rejection(&mut self) {
        self.safety_rejections += 1;
    }

    pub fn record_failure(&mut self, code: impl Into<String>) {
        self.failure = Some(code.into());
    }

    /// Total time spent in one stage across attempts.
    pub fn stage_total_ms(&self, stage: Stage) -> u64 {
        self.stages
            .iter()
            .filter(|s| s.stage == stage)
            .map(|s| s.elapsed_ms)
            .sum()
    }

    /// Close the record, computing total latency from `started_at`.
    pub fn finish(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.latency_ms = u64::try_from(elapsed.num_milliseconds()).unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Validate.to_string(), "validate");
        assert_eq!(Stage::Respond.to_string(), "respond");
    }

    #[test]
    fn test_stage_entries_accumulate() {
        let mut t = Telemetry::new("1.4.0");
        t.record_stage(Stage::Validate, 1, 10);
        t.record_stage(Stage::Validate, 2, 15);
        t.record_stage(Stage::Execute, 0, 100);
        assert_eq!(t.stages.len(), 3);
        assert_eq!(t.stage_total_ms(Stage::Validate), 25);
        assert_eq!(t.stage_total_ms(Stage::Route), 0);
    }

    #[test]
    fn test_attempts_only_grow() {
        let mut t = Telemetry::new("1.4.0");
        t.record_attempt(2);
        t.record_attempt(1);
        assert_eq!(t.attempts, 2);
    }

    #[test]
    fn test_finish_sets_latency() {
        let mut t = Telemetry::new("1.4.0");
        t.finish();
        assert!(t.latency_ms < 60_000);
        assert_eq!(t.pipeline_version, "1.4.0");
    }
}
