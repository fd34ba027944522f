//! Pipeline Data Model
//!
//! Entities that flow through one request: `Question` → `Intent` →
//! `QueryCandidate` + `ValidationVerdict` → `ExecutionResult` → `Answer`.
//! All of them are immutable values; a retry produces a new candidate rather
//! than editing the previous one.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::telemetry::Telemetry;

// ============================================================================
// Question & Intent
// ============================================================================

/// Raw question text, trimmed once on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question(String);

impl Question {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self(text.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing decision for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// The question needs a query against the dataset
    Data,
    /// Conversational input, answered without data
    Chitchat,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Data => write!(f, "data"),
            Intent::Chitchat => write!(f, "chitchat"),
        }
    }
}

// ============================================================================
// Date Window
// ============================================================================

/// Inclusive range of partition dates a candidate is allowed to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Create a window. `start` must not be after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> CoreResult<Self> {
        if start > end {
            return Err(CoreError::validation(format!(
                "window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// A window covering a single day.
    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// The `days` calendar days ending at `end`, both ends inclusive.
    ///
    /// `days == 0` is treated as a single day.
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end - Duration::days(span),
            end,
        }
    }

    /// Number of calendar days covered (always >= 1).
    pub fn days(&self) -> u32 {
        let span = (self.end - self.start).num_days();
        u32::try_from(span + 1).unwrap_or(u32::MAX)
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    /// Half of this window, keeping the end date.
    ///
    /// Returns `None` for a single day, which cannot be narrowed further.
    pub fn halved(&self) -> Option<Self> {
        if self.is_single_day() {
            return None;
        }
        Some(Self::trailing(self.end, self.days() / 2))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// ============================================================================
// Query Candidate
// ============================================================================

/// How a candidate was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateOrigin {
    /// Deterministic template, identified by name
    Template { name: String },
    /// Language-model translation
    Llm { model: String },
}

impl CandidateOrigin {
    pub fn template(name: impl Into<String>) -> Self {
        Self::Template { name: name.into() }
    }

    pub fn is_llm(&self) -> bool {
        matches!(self, CandidateOrigin::Llm { .. })
    }
}

/// A single generated query. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCandidate {
    pub sql: String,
    pub window: DateWindow,
    pub tables: Vec<String>,
    /// Generation attempt, starting at 1
    pub attempt: u32,
    pub origin: CandidateOrigin,
    /// Why this shape was chosen (template rationale or LLM note)
    pub rationale: String,
}

// ============================================================================
// Validation Verdict
// ============================================================================

/// Reason code attached to a guard rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    ForbiddenStatement,
    MultiStatement,
    OverBudget,
    SyntaxError,
    MissingFilter,
    SelectStar,
    UnknownTable,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionReason::ForbiddenStatement => "forbidden_statement",
            RejectionReason::MultiStatement => "multi_statement",
            RejectionReason::OverBudget => "over_budget",
            RejectionReason::SyntaxError => "syntax_error",
            RejectionReason::MissingFilter => "missing_filter",
            RejectionReason::SelectStar => "select_star",
            RejectionReason::UnknownTable => "unknown_table",
        };
        f.write_str(s)
    }
}

impl RejectionReason {
    /// Rejections caused by an unsafe statement rather than cost or syntax.
    pub fn is_safety(&self) -> bool {
        matches!(
            self,
            RejectionReason::ForbiddenStatement
                | RejectionReason::MultiStatement
                | RejectionReason::SelectStar
                | RejectionReason::UnknownTable
        )
    }
}

/// Outcome of the guard over one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Accepted {
        estimated_bytes: u64,
    },
    Rejected {
        reason: RejectionReason,
        /// Internal detail for logs. Never rendered to end users.
        detail: String,
        /// Dry-run estimate, when the rejection happened after planning
        estimated_bytes: Option<u64>,
    },
}

impl ValidationVerdict {
    pub fn rejected(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            detail: detail.into(),
            estimated_bytes: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accepted { .. })
    }

    pub fn reason(&self) -> Option<RejectionReason> {
        match self {
            ValidationVerdict::Accepted { .. } => None,
            ValidationVerdict::Rejected { reason, .. } => Some(*reason),
        }
    }

    pub fn estimated_bytes(&self) -> Option<u64> {
        match self {
            ValidationVerdict::Accepted { estimated_bytes } => Some(*estimated_bytes),
            ValidationVerdict::Rejected {
                estimated_bytes, ..
            } => *estimated_bytes,
        }
    }
}

/// A candidate together with the verdict it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate: QueryCandidate,
    pub verdict: ValidationVerdict,
}

// ============================================================================
// Execution Result
// ============================================================================

/// Normalized column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Float | ColumnType::Decimal
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A single cell in a stable, serializable form.
///
/// Decimals are kept as their exact string form; no locale formatting happens
/// at this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Decimal(String),
    Text(String),
}

impl CellValue {
    /// Integer view of a numeric cell (floats and decimals must be integral).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            CellValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            CellValue::Decimal(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(v) => Some(*v as f64),
            CellValue::Float(v) => Some(*v),
            CellValue::Decimal(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Plain, locale-independent rendering.
    pub fn to_plain_string(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(v) => v.to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Float(v) => v.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::Timestamp(t) => t.to_rfc3339(),
            CellValue::Decimal(s) | CellValue::Text(s) => s.clone(),
        }
    }
}

/// Typed tabular result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<Column>,
    /// Rows in engine order
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub elapsed_ms: u64,
    pub bytes_processed: u64,
}

impl ExecutionResult {
    pub fn new(
        columns: Vec<Column>,
        rows: Vec<Vec<CellValue>>,
        elapsed_ms: u64,
        bytes_processed: u64,
    ) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            elapsed_ms,
            bytes_processed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        self.rows.get(row).and_then(|r| r.get(column))
    }
}

// ============================================================================
// Answer
// ============================================================================

/// Which path produced the final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Llm,
    FallbackTemplate,
    Chitchat,
}

impl std::fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerSource::Llm => write!(f, "llm"),
            AnswerSource::FallbackTemplate => write!(f, "fallback_template"),
            AnswerSource::Chitchat => write!(f, "chitchat"),
        }
    }
}

/// Final answer of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sql_used: Option<String>,
    pub source: AnswerSource,
    pub telemetry: Telemetry,
}
