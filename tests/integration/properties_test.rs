//! Property Tests
//!
//! Fuzzed invariants of the statement checks and the synthesizer:
//! - Accepted statements are single and read-only
//! - Normalization is idempotent
//! - Synthesized candidates never carry a modification keyword or separator,
//!   not even inside a string literal
//! - The defensive window has exactly the configured length

use std::sync::Arc;

use chamado_agent::clock::FixedClock;
use chamado_agent::schema::SchemaCatalog;
use chamado_agent::synthesizer::QuerySynthesizer;
use chamado_core::{PipelineConfig, Question};
use chamado_guard::{check_shape, has_forbidden_keyword, normalize, FORBIDDEN_KEYWORDS};
use chamado_llm::LocalStubProvider;
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn synthesizer(config: PipelineConfig, today: NaiveDate) -> QuerySynthesizer {
    let catalog = SchemaCatalog::builtin(&config);
    QuerySynthesizer::new(
        config,
        catalog,
        Arc::new(LocalStubProvider::new("property tests")),
        Arc::new(FixedClock(today)),
    )
}

/// Forbidden keywords as whole words, matched on unmasked text.
fn raw_keyword_pattern() -> regex::Regex {
    let alternatives: Vec<String> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|k| k.split_whitespace().collect::<Vec<_>>().join(r"\s+"))
        .collect();
    regex::Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn sql_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("SELECT ".to_string()),
        Just("WITH t AS (".to_string()),
        Just(" FROM `a.b.c` ".to_string()),
        Just(" WHERE data_particao = DATE '2024-01-01' ".to_string()),
        Just("; ".to_string()),
        Just("DELETE ".to_string()),
        Just("drop table x ".to_string()),
        Just("-- comment\n".to_string()),
        Just("/* DELETE */".to_string()),
        Just("'it''s; DROP'".to_string()),
        Just("\"UPDATE\"".to_string()),
        Just("*".to_string()),
        "[a-z_]{1,8}".prop_map(|s| format!("{} ", s)),
    ]
}

fn sql_text() -> impl Strategy<Value = String> {
    prop::collection::vec(sql_fragment(), 0..10).prop_map(|parts| parts.concat())
}

fn question_word() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("quantos".to_string()),
        Just("chamados".to_string()),
        Just("bairros".to_string()),
        Just("subtipo".to_string()),
        Just("mais comum".to_string()),
        Just("buraco".to_string()),
        Just("em 2023".to_string()),
        Just("no dia 28/11/2024".to_string()),
        Just("últimos 30 dias".to_string()),
        Just("\"x'; DROP TABLE chamado; --\"".to_string()),
        Just("'DELETE FROM bairro'".to_string()),
        Just("top 3".to_string()),
        "[a-zA-Zçãé;']{1,10}",
    ]
}

fn question_text() -> impl Strategy<Value = String> {
    prop::collection::vec(question_word(), 1..8).prop_map(|w| w.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_accepted_shape_is_single_read_only(sql in sql_text()) {
        let normalized = normalize(&sql);
        if check_shape(&normalized).is_ok() {
            prop_assert!(!has_forbidden_keyword(&sql));
            prop_assert!(!normalized.contains(';'));
        }
    }

    #[test]
    fn prop_normalize_is_idempotent(sql in sql_text()) {
        let once = normalize(&sql);
        prop_assert_eq!(normalize(&once), once);
    }

    #[test]
    fn prop_candidates_are_safe(question in question_text()) {
        let synth = synthesizer(
            PipelineConfig::default(),
            NaiveDate::from_ymd_opt(2026, 10, 14).unwrap(),
        );
        let out = runtime().block_on(synth.synthesize(
            &Question::new(&question),
            1,
            &[],
            &CancellationToken::new(),
        ));
        if let Ok(synthesis) = out {
            let sql = &synthesis.candidate.sql;
            prop_assert!(!has_forbidden_keyword(sql), "{}", sql);
            prop_assert!(!raw_keyword_pattern().is_match(sql), "{}", sql);
            prop_assert!(!normalize(sql).contains(';'), "{}", sql);
            prop_assert!(check_shape(&normalize(sql)).is_ok(), "{}", sql);
        }
    }

    #[test]
    fn prop_defensive_window_length(days in 1u32..=3650, offset in 0i64..20_000) {
        let today = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap() + Duration::days(offset);
        let config = PipelineConfig {
            defensive_window_days: days,
            ..PipelineConfig::default()
        };
        let synth = synthesizer(config, today);
        let synthesis = runtime()
            .block_on(synth.synthesize(
                &Question::new("Quantos chamados foram abertos?"),
                1,
                &[],
                &CancellationToken::new(),
            ))
            .unwrap();
        prop_assert!(synthesis.defensive_window);
        prop_assert_eq!(synthesis.candidate.window.days(), days);
        prop_assert_eq!(synthesis.candidate.window.end, today);
    }
}
