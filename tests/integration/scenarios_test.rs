//! End-to-End Scenario Tests
//!
//! Whole requests through `Pipeline::ask` against the scripted engine:
//! - The acceptance questions (count, rankings, chitchat)
//! - Over-budget narrowing and exhausted retries
//! - Unsafe model output never reaching the engine
//! - Execution failures, empty questions and cancellation

use std::sync::Arc;

use chamado_agent::acceptance::ACCEPTANCE_QUESTIONS;
use chamado_agent::PipelineError;
use chamado_core::{AnswerSource, PipelineConfig, RejectionReason};
use chamado_engine::RunError;
use chamado_guard::{Guard, GuardConfig};
use tokio_util::sync::CancellationToken;

use crate::support::{
    count_output, pipeline, pipeline_with_model, ranking_output, window_days, ScriptedEngine,
    ScriptedProvider,
};

const MB: u64 = 1_000_000;

fn llm_config() -> PipelineConfig {
    PipelineConfig {
        llm_enabled: true,
        ..PipelineConfig::default()
    }
}

// ============================================================================
// Acceptance questions
// ============================================================================

#[tokio::test]
async fn test_count_on_a_single_day() {
    let engine = ScriptedEngine::new(5 * MB, count_output(0));
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask(ACCEPTANCE_QUESTIONS[0].text)
        .await
        .unwrap();

    let sql = response.sql_used.unwrap();
    assert!(sql.contains("data_particao = DATE '2024-11-28'"), "{}", sql);
    assert!(sql.starts_with("SELECT COUNT(1) AS total"));
    assert!(response
        .answer_text
        .starts_with("Foram abertos 0 chamados em 28/11/2024."));
    // zero counts carry the partition-date note
    assert!(response.answer_text.contains("data_particao"));
    assert_eq!(response.source, AnswerSource::FallbackTemplate);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.bytes_estimated, Some(5 * MB));
    assert!(response.failure.is_none());
    assert_eq!(engine.runs().len(), 1);
}

#[tokio::test]
async fn test_chitchat_never_touches_the_engine() {
    let engine = ScriptedEngine::new(5 * MB, count_output(1));
    let pipeline = pipeline(PipelineConfig::default(), engine.clone());

    for question in [ACCEPTANCE_QUESTIONS[4].text, ACCEPTANCE_QUESTIONS[5].text] {
        let response = pipeline.ask(question).await.unwrap();
        assert_eq!(response.source, AnswerSource::Chitchat, "{}", question);
        assert!(response.sql_used.is_none());
        assert!(response.bytes_estimated.is_none());
        assert_eq!(response.attempts, 0);
        assert!(!response.answer_text.trim().is_empty());
    }
    assert!(engine.plans().is_empty());
    assert!(engine.runs().is_empty());
}

#[tokio::test]
async fn test_subtype_ranking_over_the_defensive_window() {
    let engine = ScriptedEngine::new(
        5 * MB,
        ranking_output("subtipo", &[("Reparo de lâmpada apagada", 10_234)]),
    );
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask(ACCEPTANCE_QUESTIONS[1].text)
        .await
        .unwrap();

    let sql = response.sql_used.unwrap();
    assert!(sql.contains("LIKE '%iluminação%'"), "{}", sql);
    assert!(sql.contains("BETWEEN DATE '2025-10-15' AND DATE '2026-10-14'"));
    assert!(sql.ends_with("LIMIT 1"));
    assert_eq!(window_days(&sql), Some(365));

    assert!(response.answer_text.contains("Reparo de lâmpada apagada"));
    assert!(response.answer_text.contains("10.234 chamados"));
    assert!(response.answer_text.contains("nos últimos 365 dias"));
}

#[tokio::test]
async fn test_top_neighborhoods_use_the_coerced_join() {
    let engine = ScriptedEngine::new(
        5 * MB,
        ranking_output(
            "bairro",
            &[("Campo Grande", 812), ("Bangu", 640), ("Santa Cruz", 598)],
        ),
    );
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask(ACCEPTANCE_QUESTIONS[2].text)
        .await
        .unwrap();

    let sql = response.sql_used.unwrap();
    assert!(sql.contains("c.id_bairro = CAST(b.id_bairro AS STRING)"), "{}", sql);
    assert!(sql.contains("c.data_particao BETWEEN DATE '2023-01-01' AND DATE '2023-12-31'"));
    assert!(sql.contains("%buraco%"));
    assert!(sql.ends_with("LIMIT 3"));

    let text = &response.answer_text;
    assert!(text.starts_with("Os 3 bairros com mais chamados"), "{}", text);
    let positions: Vec<usize> = ["Campo Grande", "Bangu", "Santa Cruz"]
        .iter()
        .map(|name| text.find(name).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_org_unit_ranking() {
    let engine = ScriptedEngine::new(5 * MB, ranking_output("unidade", &[("GM-RIO", 4_021)]));
    let response = pipeline(PipelineConfig::default(), engine)
        .ask(ACCEPTANCE_QUESTIONS[3].text)
        .await
        .unwrap();

    let sql = response.sql_used.unwrap();
    assert!(sql.contains("AS unidade"), "{}", sql);
    assert!(sql.contains("%estacionamento%"));
    assert!(response
        .answer_text
        .starts_with("A unidade organizacional que mais atendeu chamados"));
    assert!(response.answer_text.contains("GM-RIO"));
}

// ============================================================================
// Budget retries
// ============================================================================

#[tokio::test]
async fn test_over_budget_then_accepted_with_a_narrower_window() {
    // 365 days x 10 MB = 3.65 GB > 2 GB; 182 days fits
    let engine = ScriptedEngine::new(10 * MB, count_output(120_000));
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask("Quantos chamados foram abertos?")
        .await
        .unwrap();

    let plans = engine.plans();
    assert_eq!(plans.len(), 2);
    let first = engine.estimate(&plans[0]);
    let second = engine.estimate(&plans[1]);
    assert!(second <= first);
    assert_eq!(window_days(&plans[0]), Some(365));
    assert_eq!(window_days(&plans[1]), Some(182));

    assert_eq!(response.attempts, 2);
    assert_eq!(response.bytes_estimated, Some(second));
    assert_eq!(response.sql_used.as_deref(), Some(plans[1].as_str()));
    assert_eq!(engine.runs(), vec![plans[1].clone()]);
    assert!(response.answer_text.contains("nos últimos 182 dias"));
}

#[tokio::test]
async fn test_retries_exhausted_never_executes() {
    let engine = ScriptedEngine::new(1_000 * MB, count_output(1));
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask("Quantos chamados foram abertos?")
        .await
        .unwrap();

    let config = PipelineConfig::default();
    assert_eq!(response.attempts, config.max_attempts());
    assert_eq!(engine.plans().len() as u32, config.max_attempts());
    assert!(engine.runs().is_empty());
    assert!(response.sql_used.is_none());
    assert_eq!(response.failure.as_deref(), Some("retries_exhausted:over_budget"));
    assert!(response.answer_text.contains("limite"));
}

// ============================================================================
// Model output
// ============================================================================

#[tokio::test]
async fn test_forbidden_model_output_never_reaches_the_engine() {
    let config = llm_config();
    let unsafe_sql = format!(
        "SELECT COUNT(1) AS total FROM `{t}` WHERE data_particao = DATE '2024-11-28'; DELETE FROM `{t}` WHERE TRUE",
        t = config.fact_table
    );
    let engine = ScriptedEngine::new(5 * MB, count_output(0));
    let provider = Arc::new(ScriptedProvider::new().sql(&unsafe_sql));
    let response = pipeline_with_model(config.clone(), engine.clone(), provider)
        .ask(ACCEPTANCE_QUESTIONS[0].text)
        .await
        .unwrap();

    // the model candidate is rejected statically, the template is accepted
    assert_eq!(response.attempts, 2);
    for sql in engine.plans().iter().chain(engine.runs().iter()) {
        assert!(!sql.to_uppercase().contains("DELETE"), "{}", sql);
    }
    assert_eq!(engine.runs().len(), 1);
    assert!(!response.sql_used.unwrap().contains("DELETE"));

    let guard = Guard::new(engine, GuardConfig::from(&config)).unwrap();
    let rejection = guard.check_local(&unsafe_sql).unwrap_err();
    assert_eq!(rejection.reason, RejectionReason::ForbiddenStatement);

    let answer = pipeline_with_model(
        config,
        ScriptedEngine::new(5 * MB, count_output(0)),
        Arc::new(ScriptedProvider::new().sql(&unsafe_sql)),
    )
    .answer(ACCEPTANCE_QUESTIONS[0].text, &CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(answer.telemetry.safety_rejections, 1);
}

#[tokio::test]
async fn test_model_sql_wider_than_the_window_is_replaced() {
    let config = llm_config();
    let wide_sql = format!(
        "SELECT COUNT(1) AS total FROM `{}` WHERE data_particao >= DATE '2000-01-01'",
        config.fact_table
    );
    let engine = ScriptedEngine::new(5 * MB, count_output(812_345));
    let provider = Arc::new(ScriptedProvider::new().sql(&wide_sql));
    let response = pipeline_with_model(config, engine.clone(), provider)
        .ask("Quantos chamados foram abertos?")
        .await
        .unwrap();

    let sql = response.sql_used.unwrap();
    assert!(sql.contains("BETWEEN DATE '2025-10-15' AND DATE '2026-10-14'"), "{}", sql);
    for seen in engine.plans().iter().chain(engine.runs().iter()) {
        assert!(!seen.contains("2000-01-01"), "{}", seen);
    }
    assert_eq!(response.attempts, 1);
    assert!(response.answer_text.contains("nos últimos 365 dias"));
}

#[tokio::test]
async fn test_grounded_model_summary_is_used() {
    let config = llm_config();
    let sql = format!(
        "SELECT COUNT(1) AS total FROM `{}` WHERE data_particao = DATE '2024-11-28'",
        config.fact_table
    );
    let engine = ScriptedEngine::new(5 * MB, count_output(0));
    let provider = Arc::new(
        ScriptedProvider::new()
            .sql(&format!("```sql\n{};\n```", sql))
            .text("Em 28/11/2024 foram abertos 0 chamados."),
    );
    let response = pipeline_with_model(config, engine.clone(), provider.clone())
        .ask(ACCEPTANCE_QUESTIONS[0].text)
        .await
        .unwrap();

    assert_eq!(response.source, AnswerSource::Llm);
    assert_eq!(response.answer_text, "Em 28/11/2024 foram abertos 0 chamados.");
    assert_eq!(response.sql_used.as_deref(), Some(sql.as_str()));
    assert_eq!(response.attempts, 1);
    assert_eq!(provider.prompt_count(), 2);
}

#[tokio::test]
async fn test_ungrounded_model_summary_falls_back() {
    let engine = ScriptedEngine::new(5 * MB, count_output(0));
    let provider = Arc::new(ScriptedProvider::new().text("Foram abertos 999 chamados."));
    let response = pipeline_with_model(llm_config(), engine, provider)
        .ask(ACCEPTANCE_QUESTIONS[0].text)
        .await
        .unwrap();

    assert_eq!(response.source, AnswerSource::FallbackTemplate);
    assert!(!response.answer_text.contains("999"));
    assert!(response.answer_text.starts_with("Foram abertos 0 chamados"));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_engine_error_is_terminal_and_sanitized() {
    let engine = ScriptedEngine::failing(
        5 * MB,
        RunError::engine("backendError: internal stack trace 0xdeadbeef"),
    );
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask(ACCEPTANCE_QUESTIONS[0].text)
        .await
        .unwrap();

    assert_eq!(engine.runs().len(), 1);
    assert_eq!(response.failure.as_deref(), Some("execution:engine_error"));
    assert!(!response.answer_text.contains("deadbeef"));
    assert!(!response.answer_text.contains("backendError"));
    assert!(!response.answer_text.is_empty());
}

#[tokio::test]
async fn test_engine_timeout_is_not_retried() {
    let engine = ScriptedEngine::failing(5 * MB, RunError::Timeout);
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask(ACCEPTANCE_QUESTIONS[0].text)
        .await
        .unwrap();

    assert_eq!(engine.runs().len(), 1);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.failure.as_deref(), Some("execution:timeout"));
}

#[tokio::test]
async fn test_empty_question() {
    let engine = ScriptedEngine::new(5 * MB, count_output(0));
    let response = pipeline(PipelineConfig::default(), engine.clone())
        .ask("   ")
        .await
        .unwrap();
    assert_eq!(response.answer_text, "Por favor, forneça uma pergunta.");
    assert!(engine.plans().is_empty());
}

#[tokio::test]
async fn test_cancelled_request_returns_no_answer() {
    let engine = ScriptedEngine::new(5 * MB, count_output(0));
    let token = CancellationToken::new();
    token.cancel();
    let err = pipeline(PipelineConfig::default(), engine.clone())
        .ask_cancellable(ACCEPTANCE_QUESTIONS[0].text, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(engine.runs().is_empty());
}

#[tokio::test]
async fn test_requests_get_distinct_ids() {
    let engine = ScriptedEngine::new(5 * MB, count_output(3));
    let pipeline = pipeline(PipelineConfig::default(), engine);
    let a = pipeline.ask(ACCEPTANCE_QUESTIONS[0].text).await.unwrap();
    let b = pipeline.ask(ACCEPTANCE_QUESTIONS[0].text).await.unwrap();
    assert_ne!(a.request_id, b.request_id);
    assert_eq!(a.pipeline_version, b.pipeline_version);
}
