//! Request Context
//!
//! `RequestContext` owns the full lifecycle of one question:
//!
//! 1. exactly one `Intent`
//! 2. zero or more `QueryCandidate`s, each with its verdict
//! 3. at most one `ExecutionResult`, only for the accepted candidate
//! 4. exactly one `Answer`, produced by consuming the context
//!
//! The mutation methods enforce these rules and return `CoreError::Invariant`
//! when a caller tries to break them. A context is never shared between
//! requests.

use crate::error::{CoreError, CoreResult};
use crate::model::{
    Answer, AnswerSource, CandidateRecord, ExecutionResult, Intent, QueryCandidate, Question,
    ValidationVerdict,
};
use crate::telemetry::Telemetry;

/// Lifecycle owner for one in-flight question.
#[derive(Debug)]
pub struct RequestContext {
    question: Question,
    intent: Option<Intent>,
    records: Vec<CandidateRecord>,
    result: Option<ExecutionResult>,
    telemetry: Telemetry,
}

impl RequestContext {
    /// Create a context for a freshly received question.
    pub fn new(question: Question, pipeline_version: impl Into<String>) -> Self {
        Self {
            question,
            intent: None,
            records: Vec::new(),
            result: None,
            telemetry: Telemetry::new(pipeline_version),
        }
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    /// Record the routing decision. Allowed once.
    pub fn set_intent(&mut self, intent: Intent) -> CoreResult<()> {
        if let Some(existing) = self.intent {
            return Err(CoreError::invariant(format!(
                "intent already decided as {}",
                existing
            )));
        }
        self.intent = Some(intent);
        Ok(())
    }

    /// Candidates generated so far, in attempt order.
    pub fn records(&self) -> &[CandidateRecord] {
        &self.records
    }

    /// Attempt number the next candidate must carry.
    pub fn next_attempt(&self) -> u32 {
        u32::try_from(self.records.len()).unwrap_or(u32::MAX - 1) + 1
    }

    pub fn accepted(&self) -> Option<&CandidateRecord> {
        self.records.iter().find(|r| r.verdict.is_accepted())
    }

    /// Store a candidate with its verdict.
    ///
    /// Fails when the request is not a data request, when a candidate was
    /// already accepted, or when the attempt number is out of sequence.
    pub fn record_candidate(
        &mut self,
        candidate: QueryCandidate,
        verdict: ValidationVerdict,
    ) -> CoreResult<()> {
        if self.intent != Some(Intent::Data) {
            return Err(CoreError::invariant(
                "candidates are only allowed for data requests",
            ));
        }
        if self.accepted().is_some() {
            return Err(CoreError::invariant(
                "a candidate was already accepted for this request",
            ));
        }
        let expected = self.next_attempt();
        if candidate.attempt != expected {
            return Err(CoreError::invariant(format!(
                "candidate attempt {} out of sequence, expected {}",
                candidate.attempt, expected
            )));
        }
        self.telemetry.record_attempt(candidate.attempt);
        if let Some(bytes) = verdict.estimated_bytes() {
            self.telemetry.record_estimate(bytes);
        }
        if verdict.reason().is_some_and(|r| r.is_safety()) {
            self.telemetry.record_safety_rejection();
        }
        self.records.push(CandidateRecord { candidate, verdict });
        Ok(())
    }

    /// Store the execution result of the accepted candidate. Allowed once.
    pub fn set_result(&mut self, result: ExecutionResult) -> CoreResult<()> {
        if self.accepted().is_none() {
            return Err(CoreError::invariant(
                "execution result without an accepted candidate",
            ));
        }
        if self.result.is_some() {
            return Err(CoreError::invariant("execution result already recorded"));
        }
        self.telemetry.record_processed(result.bytes_processed);
        self.result = Some(result);
        Ok(())
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut Telemetry {
        &mut self.telemetry
    }

    /// Consume the context and produce the single `Answer` of the request.
    ///
    /// `sql_used` is the accepted candidate's SQL, if any.
    pub fn into_answer(mut self, text: String, source: AnswerSource) -> Answer {
        self.telemetry.finish();
        let sql_used = self
            .records
            .iter()
            .find(|r| r.verdict.is_accepted())
            .map(|r| r.candidate.sql.clone());
        Answer {
            text,
            sql_used,
            source,
            telemetry: self.telemetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateOrigin, DateWindow, RejectionReason};
    use chrono::NaiveDate;

    fn candidate(attempt: u32) -> QueryCandidate {
        let day = NaiveDate::from_ymd_opt(2024, 11, 28).unwrap();
        QueryCandidate {
            sql: format!("SELECT COUNT(1) AS total -- attempt {}", attempt),
            window: DateWindow::single_day(day),
            tables: vec!["chamado".to_string()],
            attempt,
            origin: CandidateOrigin::template("count"),
            rationale: "test".to_string(),
        }
    }

    fn data_context() -> RequestContext {
        let mut ctx = RequestContext::new(Question::new("Quantos chamados?"), "test");
        ctx.set_intent(Intent::Data).unwrap();
        ctx
    }

    #[test]
    fn test_intent_is_set_once() {
        let mut ctx = RequestContext::new(Question::new("Oi"), "test");
        ctx.set_intent(Intent::Chitchat).unwrap();
        assert!(matches!(
            ctx.set_intent(Intent::Data),
            Err(CoreError::Invariant(_))
        ));
        assert_eq!(ctx.intent(), Some(Intent::Chitchat));
    }

    #[test]
    fn test_chitchat_rejects_candidates() {
        let mut ctx = RequestContext::new(Question::new("Oi"), "test");
        ctx.set_intent(Intent::Chitchat).unwrap();
        let verdict = ValidationVerdict::Accepted { estimated_bytes: 1 };
        assert!(ctx.record_candidate(candidate(1), verdict).is_err());
    }

    #[test]
    fn test_only_one_candidate_is_accepted() {
        let mut ctx = data_context();
        ctx.record_candidate(
            candidate(1),
            ValidationVerdict::rejected(RejectionReason::OverBudget, "big"),
        )
        .unwrap();
        ctx.record_candidate(candidate(2), ValidationVerdict::Accepted { estimated_bytes: 10 })
            .unwrap();
        let err = ctx
            .record_candidate(candidate(3), ValidationVerdict::Accepted { estimated_bytes: 5 })
            .unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));
        assert_eq!(ctx.records().len(), 2);
        assert_eq!(ctx.telemetry().attempts, 2);
        assert_eq!(ctx.telemetry().bytes_estimated, Some(10));
    }

    #[test]
    fn test_safety_rejections_are_counted() {
        let mut ctx = data_context();
        ctx.record_candidate(
            candidate(1),
            ValidationVerdict::rejected(RejectionReason::ForbiddenStatement, "DELETE"),
        )
        .unwrap();
        ctx.record_candidate(
            candidate(2),
            ValidationVerdict::rejected(RejectionReason::OverBudget, "big"),
        )
        .unwrap();
        ctx.record_candidate(
            candidate(3),
            ValidationVerdict::rejected(RejectionReason::UnknownTable, "x.y.z"),
        )
        .unwrap();
        assert_eq!(ctx.telemetry().safety_rejections, 2);
    }

    #[test]
    fn test_attempts_must_be_sequential() {
        let mut ctx = data_context();
        let verdict = ValidationVerdict::rejected(RejectionReason::SyntaxError, "bad");
        assert!(ctx.record_candidate(candidate(2), verdict).is_err());
        assert_eq!(ctx.next_attempt(), 1);
    }

    #[test]
    fn test_result_requires_accepted_candidate() {
        let mut ctx = data_context();
        let result = ExecutionResult::new(vec![], vec![], 1, 0);
        assert!(ctx.set_result(result.clone()).is_err());

        ctx.record_candidate(candidate(1), ValidationVerdict::Accepted { estimated_bytes: 3 })
            .unwrap();
        ctx.set_result(result.clone()).unwrap();
        assert!(ctx.set_result(result).is_err());
    }

    #[test]
    fn test_answer_carries_accepted_sql() {
        let mut ctx = data_context();
        ctx.record_candidate(candidate(1), ValidationVerdict::Accepted { estimated_bytes: 3 })
            .unwrap();
        let answer = ctx.into_answer("Contagem: 0.".to_string(), AnswerSource::FallbackTemplate);
        assert_eq!(
            answer.sql_used.as_deref(),
            Some("SELECT COUNT(1) AS total -- attempt 1")
        );
        assert_eq!(answer.telemetry.attempts, 1);
    }

    #[test]
    fn test_answer_without_candidates_has_no_sql() {
        let ctx = RequestContext::new(Question::new("Olá"), "test");
        let answer = ctx.into_answer("Olá!".to_string(), AnswerSource::Chitchat);
        assert!(answer.sql_used.is_none());
    }
}
