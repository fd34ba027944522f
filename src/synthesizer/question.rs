//! Question parsing
//!
//! Extracts the parts of a question the deterministic templates need: the
//! query shape (count or ranking by a dimension), an explicit date window,
//! topic terms and the ranking limit. Matching runs on folded text (lowercase,
//! no diacritics); topic terms keep their accents so they match the stored
//! category names.

use std::sync::OnceLock;

use chamado_core::{DateWindow, Question};
use chamado_guard::FORBIDDEN_KEYWORDS;
use chrono::{Duration, Months, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{SynthesisError, SynthesisResult};
use crate::utils::text::{fold, words};

const DEFAULT_PLURAL_LIMIT: u32 = 5;
const MAX_LIMIT: u32 = 50;

// ============================================================================
// Types
// ============================================================================

/// Column family a ranking groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Neighborhood,
    OrgUnit,
    Subtype,
    Category,
    Status,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "by", rename_all = "snake_case")]
pub enum QueryShape {
    Count,
    TopBy(Dimension),
}

/// Parsed form of a data question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub shape: QueryShape,
    /// Window stated in the question, `None` when the defensive window applies
    pub window: Option<DateWindow>,
    /// Terms that must all appear in one text column
    pub topic: Vec<String>,
    pub limit: u32,
}

// ============================================================================
// Vocabulary (folded)
// ============================================================================

/// Dimension words in priority order.
const DIMENSION_WORDS: &[(Dimension, &[&str])] = &[
    (Dimension::Neighborhood, &["bairro", "bairros"]),
    (
        Dimension::OrgUnit,
        &["unidade", "unidades", "orgao", "orgaos", "secretaria", "secretarias"],
    ),
    (Dimension::Subtype, &["subtipo", "subtipos"]),
    (Dimension::Category, &["categoria", "categorias"]),
    (Dimension::Status, &["status", "situacao"]),
    (Dimension::Type, &["tipo", "tipos"]),
];

const PLURAL_NOUNS: &[&str] = &[
    "bairros", "unidades", "orgaos", "secretarias", "subtipos", "categorias", "tipos",
];

const COUNT_WORDS: &[&str] = &["quantos", "quantas", "quantidade", "total", "contagem"];

const NUMBER_WORDS: &[(&str, u32)] = &[
    ("um", 1),
    ("uma", 1),
    ("dois", 2),
    ("duas", 2),
    ("tres", 3),
    ("quatro", 4),
    ("cinco", 5),
    ("seis", 6),
    ("sete", 7),
    ("oito", 8),
    ("nove", 9),
    ("dez", 10),
];

const MONTHS: &[&str] = &[
    "janeiro", "fevereiro", "marco", "abril", "maio", "junho", "julho", "agosto", "setembro",
    "outubro", "novembro", "dezembro",
];

/// Known 1746 topics: folded phrase -> accented terms. First match wins, so
/// longer phrases come first.
const TOPICS: &[(&str, &[&str])] = &[
    (
        "fiscalizacao de estacionamento irregular",
        &["fiscalização", "estacionamento", "irregular"],
    ),
    ("estacionamento irregular", &["estacionamento", "irregular"]),
    ("iluminacao publica", &["iluminação", "pública"]),
    ("reparo de buraco", &["reparo", "buraco"]),
    ("reparo de buracos", &["reparo", "buraco"]),
    ("poda de arvore", &["poda"]),
    ("poda de arvores", &["poda"]),
    ("remocao de entulho", &["remoção", "entulho"]),
    ("lampada apagada", &["lâmpada", "apagada"]),
    ("perturbacao do sossego", &["perturbação", "sossego"]),
    ("limpeza urbana", &["limpeza"]),
    ("buraco", &["buraco"]),
    ("buracos", &["buraco"]),
    ("entulho", &["entulho"]),
    ("vazamento", &["vazamento"]),
    ("lampada", &["lâmpada"]),
    ("iluminacao", &["iluminação"]),
    ("estacionamento", &["estacionamento"]),
];

const STOPWORDS: &[&str] = &[
    "de", "da", "do", "das", "dos", "a", "o", "as", "os", "e", "em", "no", "na", "para",
];

// ============================================================================
// Patterns
// ============================================================================

struct Patterns {
    full_date: Regex,
    trailing: Regex,
    month_year: Regex,
    year: Regex,
    top_n: Regex,
    n_noun: Regex,
    quoted: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                full_date: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").ok()?,
                trailing: Regex::new(
                    r"\bultim[oa]s?\s+(?:(\d{1,4})\s+)?(dias?|semanas?|meses|mes|anos?)\b",
                )
                .ok()?,
                month_year: Regex::new(&format!(
                    r"\b({})\s+(?:de\s+)?((?:19|20)\d{{2}})\b",
                    MONTHS.join("|")
                ))
                .ok()?,
                year: Regex::new(r"\b((?:19|20)\d{2})\b").ok()?,
                top_n: Regex::new(r"\btop\s*(\d{1,3})\b").ok()?,
                n_noun: Regex::new(&format!(
                    r"\b(\d{{1,3}}|{})\s+(?:maiores\s+|principais\s+)?(?:{})\b",
                    NUMBER_WORDS
                        .iter()
                        .map(|(w, _)| *w)
                        .collect::<Vec<_>>()
                        .join("|"),
                    PLURAL_NOUNS.join("|")
                ))
                .ok()?,
                quoted: Regex::new(r#"["“”'‘’]([^"“”'‘’]{2,80})["“”'‘’]"#).ok()?,
            })
        })
        .as_ref()
}

fn rules_unavailable() -> SynthesisError {
    SynthesisError::unsupported("question patterns unavailable")
}

fn contains_phrase(folded_words: &[&str], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    folded_words
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

// ============================================================================
// Dates
// ============================================================================

fn window_for_span(start: NaiveDate, end: NaiveDate) -> SynthesisResult<DateWindow> {
    DateWindow::new(start, end).map_err(|e| SynthesisError::unsupported(e.to_string()))
}

fn month_window(year: i32, month: u32) -> Option<DateWindow> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = start.checked_add_months(Months::new(1))? - Duration::days(1);
    Some(DateWindow { start, end })
}

/// Explicit date window stated in the question, anchored on `today` for
/// relative expressions.
///
/// Precedence: `dd/mm/yyyy` dates, relative expressions (`últimos N dias`,
/// `hoje`, `ontem`), a month with a year, a bare year.
pub fn parse_window(question: &Question, today: NaiveDate) -> SynthesisResult<Option<DateWindow>> {
    let folded = fold(question.as_str());
    let p = patterns().ok_or_else(rules_unavailable)?;

    let mut dates = Vec::new();
    for cap in p.full_date.captures_iter(&folded) {
        let parts = (
            cap[1].parse::<u32>().ok(),
            cap[2].parse::<u32>().ok(),
            cap[3].parse::<i32>().ok(),
        );
        let date = match parts {
            (Some(d), Some(m), Some(y)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        match date {
            Some(date) => dates.push(date),
            None => {
                return Err(SynthesisError::unsupported(format!(
                    "invalid date {}",
                    &cap[0]
                )))
            }
        }
    }
    if let (Some(first), Some(last)) = (dates.iter().min(), dates.iter().max()) {
        return window_for_span(*first, *last).map(Some);
    }

    if let Some(cap) = p.trailing.captures(&folded) {
        let n: u32 = cap
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1)
            .max(1);
        let unit = cap.get(2).map_or("dias", |m| m.as_str());
        let window = match unit {
            "dia" | "dias" => DateWindow::trailing(today, n),
            "semana" | "semanas" => DateWindow::trailing(today, n.saturating_mul(7)),
            _ => {
                let months = if unit.starts_with("ano") {
                    n.saturating_mul(12)
                } else {
                    n
                };
                let start = today
                    .checked_sub_months(Months::new(months))
                    .map(|d| d + Duration::days(1))
                    .ok_or_else(|| SynthesisError::unsupported("relative window out of range"))?;
                window_for_span(start, today)?
            }
        };
        return Ok(Some(window));
    }

    let ws = words(&folded);
    if ws.contains(&"hoje") {
        return Ok(Some(DateWindow::single_day(today)));
    }
    if ws.contains(&"ontem") {
        return Ok(Some(DateWindow::single_day(today - Duration::days(1))));
    }

    if let Some(cap) = p.month_year.captures(&folded) {
        let month = MONTHS
            .iter()
            .position(|m| *m == &cap[1])
            .and_then(|i| u32::try_from(i + 1).ok());
        let year = cap[2].parse::<i32>().ok();
        if let (Some(month), Some(year)) = (month, year) {
            if let Some(window) = month_window(year, month) {
                return Ok(Some(window));
            }
        }
    }

    if let Some(cap) = p.year.captures(&folded) {
        if let Ok(year) = cap[1].parse::<i32>() {
            let start = NaiveDate::from_ymd_opt(year, 1, 1);
            let end = NaiveDate::from_ymd_opt(year, 12, 31);
            if let (Some(start), Some(end)) = (start, end) {
                return window_for_span(start, end).map(Some);
            }
        }
    }

    Ok(None)
}

// ============================================================================
// Topics & limits
// ============================================================================

/// Keep letters, digits, spaces and hyphens.
pub fn sanitize_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether any hyphen-separated part of `term` is a word of a forbidden
/// keyword. Such terms never reach a LIKE pattern.
fn is_keyword_like(term: &str) -> bool {
    term.split('-').any(|part| {
        FORBIDDEN_KEYWORDS
            .iter()
            .flat_map(|k| k.split_whitespace())
            .any(|word| word.eq_ignore_ascii_case(part))
    })
}

fn topic_terms(question: &Question, folded_words: &[&str]) -> SynthesisResult<Vec<String>> {
    let p = patterns().ok_or_else(rules_unavailable)?;
    if let Some(cap) = p.quoted.captures(question.as_str()) {
        let lowered = cap[1].to_lowercase();
        let terms: Vec<String> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .map(sanitize_term)
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(&fold(t).as_str()))
            .filter(|t| !is_keyword_like(t))
            .collect();
        if !terms.is_empty() {
            return Ok(terms);
        }
    }
    Ok(TOPICS
        .iter()
        .find(|(phrase, _)| contains_phrase(folded_words, phrase))
        .map(|(_, terms)| terms.iter().map(|t| sanitize_term(t)).collect())
        .unwrap_or_default())
}

fn parse_limit(folded: &str, folded_words: &[&str]) -> SynthesisResult<u32> {
    let p = patterns().ok_or_else(rules_unavailable)?;
    let explicit = p
        .top_n
        .captures(folded)
        .or_else(|| p.n_noun.captures(folded))
        .and_then(|cap| {
            let token = cap.get(1)?.as_str();
            token.parse::<u32>().ok().or_else(|| {
                NUMBER_WORDS
                    .iter()
                    .find(|(w, _)| *w == token)
                    .map(|(_, n)| *n)
            })
        });
    let limit = match explicit {
        Some(n) => n,
        None if folded_words.contains(&"quais")
            || folded_words.iter().any(|w| PLURAL_NOUNS.contains(w)) =>
        {
            DEFAULT_PLURAL_LIMIT
        }
        None => 1,
    };
    Ok(limit.clamp(1, MAX_LIMIT))
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse a data question into a template-ready form.
///
/// Fails with `Unsupported` when neither a ranking dimension nor a count can be
/// recognized, or when a stated date is invalid.
pub fn parse(question: &Question, today: NaiveDate) -> SynthesisResult<ParsedQuestion> {
    let folded = fold(question.as_str());
    let ws = words(&folded);

    let dimension = DIMENSION_WORDS
        .iter()
        .find(|(_, vocab)| ws.iter().any(|w| vocab.contains(w)))
        .map(|(d, _)| *d);

    let shape = match dimension {
        Some(d) => QueryShape::TopBy(d),
        None if ws.iter().any(|w| COUNT_WORDS.contains(w))
            || contains_phrase(&ws, "numero de")
            || ws.iter().any(|w| *w == "chamado" || *w == "chamados") =>
        {
            QueryShape::Count
        }
        None => {
            return Err(SynthesisError::unsupported(
                "no count or ranking dimension recognized",
            ))
        }
    };

    let window = parse_window(question, today)?;
    let topic = topic_terms(question, &ws)?;
    let limit = match shape {
        QueryShape::Count => 1,
        QueryShape::TopBy(_) => parse_limit(&folded, &ws)?,
    };

    Ok(ParsedQuestion {
        shape,
        window,
        topic,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn parsed(text: &str) -> ParsedQuestion {
        parse(&Question::new(text), today()).unwrap()
    }

    #[test]
    fn test_single_day_count() {
        let p = parsed("Quantos chamados foram abertos no dia 28/11/2024?");
        assert_eq!(p.shape, QueryShape::Count);
        assert_eq!(p.window, Some(DateWindow::single_day(date(2024, 11, 28))));
        assert!(p.topic.is_empty());
    }

    #[test]
    fn test_subtype_ranking_with_topic() {
        let p = parsed("Qual o subtipo de chamado mais comum relacionado a Iluminação Pública?");
        assert_eq!(p.shape, QueryShape::TopBy(Dimension::Subtype));
        assert_eq!(p.window, None);
        assert_eq!(p.topic, vec!["iluminação", "pública"]);
        assert_eq!(p.limit, 1);
    }

    #[test]
    fn test_neighborhood_top_three_in_year() {
        let p = parsed(
            "Quais os 3 bairros que mais tiveram chamados abertos sobre reparo de buraco em 2023?",
        );
        assert_eq!(p.shape, QueryShape::TopBy(Dimension::Neighborhood));
        assert_eq!(p.limit, 3);
        assert_eq!(p.topic, vec!["reparo", "buraco"]);
        let w = p.window.unwrap();
        assert_eq!((w.start, w.end), (date(2023, 1, 1), date(2023, 12, 31)));
    }

    #[test]
    fn test_org_unit_ranking() {
        let p = parsed(
            "Qual o nome da unidade organizacional que mais atendeu chamados de Fiscalização de estacionamento irregular?",
        );
        assert_eq!(p.shape, QueryShape::TopBy(Dimension::OrgUnit));
        assert_eq!(p.topic, vec!["fiscalização", "estacionamento", "irregular"]);
        assert_eq!(p.limit, 1);
    }

    #[test]
    fn test_quoted_topic_wins() {
        let p = parsed("Qual o subtipo mais comum relacionado a 'Iluminação Pública'?");
        assert_eq!(p.topic, vec!["iluminação", "pública"]);
    }

    #[test]
    fn test_quoted_keywords_are_not_topic_terms() {
        let p = parsed("Quantos chamados sobre \"buraco; DROP TABLE chamado\" em 2024?");
        assert_eq!(p.topic, vec!["buraco", "table", "chamado"]);

        let p = parsed("Quantos chamados sobre 'delete-me' em 2024?");
        assert!(p.topic.is_empty());
        assert!(is_keyword_like("Rollback"));
        assert!(is_keyword_like("data"));
        assert!(!is_keyword_like("buraco"));
    }

    #[test]
    fn test_date_range_and_entre() {
        let p = parsed("Quantos chamados entre 01/03/2024 e 15/03/2024?");
        let w = p.window.unwrap();
        assert_eq!((w.start, w.end), (date(2024, 3, 1), date(2024, 3, 15)));
    }

    #[test]
    fn test_invalid_date_is_unsupported() {
        let err = parse(&Question::new("Quantos chamados em 31/02/2024?"), today()).unwrap_err();
        assert!(matches!(err, SynthesisError::Unsupported(_)));
    }

    #[test]
    fn test_relative_windows() {
        let w = parse_window(&Question::new("chamados nos últimos 30 dias"), today())
            .unwrap()
            .unwrap();
        assert_eq!(w.days(), 30);
        assert_eq!(w.end, today());

        let w = parse_window(&Question::new("chamados nos últimos 2 meses"), today())
            .unwrap()
            .unwrap();
        assert_eq!((w.start, w.end), (date(2026, 8, 15), today()));

        let w = parse_window(&Question::new("quantos chamados ontem"), today())
            .unwrap()
            .unwrap();
        assert_eq!(w, DateWindow::single_day(date(2026, 10, 13)));
    }

    #[test]
    fn test_month_with_year() {
        let w = parse_window(&Question::new("Quantos chamados em fevereiro de 2024?"), today())
            .unwrap()
            .unwrap();
        assert_eq!((w.start, w.end), (date(2024, 2, 1), date(2024, 2, 29)));
    }

    #[test]
    fn test_limits() {
        assert_eq!(parsed("top 10 subtipos em 2024").limit, 10);
        assert_eq!(parsed("quais os tres bairros com mais chamados").limit, 3);
        assert_eq!(parsed("quais categorias mais comuns").limit, 5);
        assert_eq!(parsed("top 500 bairros").limit, 50);
    }

    #[test]
    fn test_sanitize_term() {
        assert_eq!(sanitize_term("buraco'; DROP--"), "buraco DROP--");
        assert_eq!(sanitize_term("100%_x"), "100x");
    }

    #[test]
    fn test_unrecognized_shape_is_unsupported() {
        let err = parse(&Question::new("E sobre a zona norte?"), today()).unwrap_err();
        assert!(matches!(err, SynthesisError::Unsupported(_)));
    }
}
