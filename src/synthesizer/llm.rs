//! Language-model translation of a question into SQL.
//!
//! The model gets the table layout, the join rule and the window it must
//! apply, and has to answer with one statement and nothing else. Anything
//! that does not look like a single read-only statement is discarded and the
//! caller falls back to the templates, and so is SQL whose partition
//! filter is anything other than the requested window. The Guard still
//! checks whatever is returned here.

use chamado_core::{DateWindow, PipelineConfig, Question};
use chamado_guard::{normalize, references::referenced_tables};
use chamado_llm::{CompletionConstraints, CompletionRequest, LlmError, LlmProvider};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::templates::{date_literal, window_predicate};
use crate::schema::{SchemaCatalog, NEIGHBORHOOD_NAME};
use crate::utils::text::{sql_preview, truncate_for_log};

/// Why a translation produced no usable SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationFailure {
    Unavailable,
    Timeout,
    Cancelled,
    Provider(LlmError),
    /// Output was not a single SELECT/WITH statement
    Malformed(String),
}

impl std::fmt::Display for TranslationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslationFailure::Unavailable => write!(f, "model unavailable"),
            TranslationFailure::Timeout => write!(f, "model timed out"),
            TranslationFailure::Cancelled => write!(f, "cancelled"),
            TranslationFailure::Provider(e) => write!(f, "provider error: {}", e),
            TranslationFailure::Malformed(out) => write!(f, "malformed output: {}", out),
        }
    }
}

/// SQL produced by the model, with the tables it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub sql: String,
    pub tables: Vec<String>,
}

fn describe_columns(catalog: &SchemaCatalog, fact: bool) -> String {
    let table = if fact { &catalog.fact } else { &catalog.dimension };
    table
        .columns
        .iter()
        .map(|(name, ty)| format!("{} {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ")
}

/// System prompt describing the dataset and the output contract.
pub fn system_prompt(config: &PipelineConfig, catalog: &SchemaCatalog) -> String {
    let join = catalog
        .neighborhood_join("c", "b")
        .unwrap_or_else(|| "c.id_bairro = b.id_bairro".to_string());
    format!(
        "Você traduz perguntas em português sobre os chamados do 1746 (Rio de Janeiro) para uma única consulta BigQuery Standard SQL.\n\
         Tabela de chamados: `{fact}` (colunas: {fact_cols}). Particionada por {partition} (DATE).\n\
         Tabela de bairros: `{dim}` (colunas: {dim_cols}). Junção: `{fact}` AS c JOIN `{dim}` AS b ON {join}; nome do bairro em b.{name}.\n\
         Regras obrigatórias:\n\
         - Responda somente com a consulta, sem explicações e sem markdown.\n\
         - Uma única instrução SELECT (ou WITH), sem ponto e vírgula.\n\
         - Nunca use SELECT *; liste as colunas.\n\
         - Sempre filtre {partition} com o período informado.\n\
         - Agregue na consulta (COUNT(1) AS total, GROUP BY, ORDER BY total DESC, LIMIT).\n\
         - Para filtrar assuntos use LOWER(coluna) LIKE '%termo%' em subtipo, tipo ou categoria.",
        fact = config.fact_table,
        fact_cols = describe_columns(catalog, true),
        partition = config.partition_column,
        dim = config.dimension_table,
        dim_cols = describe_columns(catalog, false),
        join = join,
        name = NEIGHBORHOOD_NAME,
    )
}

/// User prompt: the question plus the window predicate to apply.
pub fn user_prompt(question: &Question, window: &DateWindow, config: &PipelineConfig) -> String {
    format!(
        "Pergunta: {}\nPeríodo obrigatório: {}",
        question,
        window_predicate(&config.partition_column, window)
    )
}

/// Strip markdown fences and one trailing `;`, then require a SELECT/WITH
/// start.
pub fn extract_sql(output: &str) -> Option<String> {
    let mut text = output.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest
            .strip_prefix("sql")
            .or_else(|| rest.strip_prefix("SQL"))
            .unwrap_or(rest);
        text = rest.trim();
        if let Some(inner) = text.strip_suffix("```") {
            text = inner.trim();
        }
    }
    let text = text.strip_suffix(';').unwrap_or(text).trim();
    let first = text.split_whitespace().next()?.to_ascii_uppercase();
    if first == "SELECT" || first == "WITH" {
        Some(text.to_string())
    } else {
        None
    }
}

// ============================================================================
// Window Binding
// ============================================================================

const QUALIFIER: &str = r"(?:[A-Za-z_][A-Za-z0-9_]*\.)?`?";
const COMPARISON: &str = r"(?:<=|>=|<>|!=|=|<|>|BETWEEN\b|IN\b|NOT\b)";

/// Start offsets of `column` (optionally alias-qualified) followed by `tail`.
fn column_matches(text: &str, column: &str, tail: &str) -> Option<Vec<usize>> {
    let pattern = format!(
        r"(?i)(?:^|[^A-Za-z0-9_.`])({}{}`?)\s*{}",
        QUALIFIER,
        regex::escape(column),
        tail
    );
    let re = Regex::new(&pattern).ok()?;
    Some(
        re.captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.start()))
            .collect(),
    )
}

/// Whether `text[at..]` shares its parenthesis group with a bare `OR`.
fn beside_top_level_or(text: &str, at: usize) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut depth = 0;
    for i in (0..at).rev() {
        match bytes[i] {
            b')' => depth += 1,
            b'(' if depth == 0 => {
                start = i + 1;
                break;
            }
            b'(' => depth -= 1,
            _ => {}
        }
    }
    let mut end = text.len();
    depth = 0;
    for (i, &b) in bytes.iter().enumerate().skip(at) {
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => {
                end = i;
                break;
            }
            b')' => depth -= 1,
            _ => {}
        }
    }

    let mut level = String::with_capacity(end - start);
    depth = 0;
    for ch in text[start..end].chars() {
        match ch {
            '(' => {
                depth += 1;
                level.push(' ');
            }
            ')' => {
                depth -= 1;
                level.push(' ');
            }
            c if depth == 0 => level.push(c),
            _ => level.push(' '),
        }
    }
    level
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word.eq_ignore_ascii_case("or"))
}

/// Whether `sql` restricts `column` to exactly `window`.
///
/// Every comparison on the column must be the window predicate, at least one
/// must exist, and none may be widened by an `OR` in the same group.
pub fn respects_window(sql: &str, column: &str, window: &DateWindow) -> bool {
    let exact_tail = if window.is_single_day() {
        format!(r"=\s*{}", literal_pattern(&date_literal(window.start)))
    } else {
        format!(
            r"BETWEEN\s+{}\s+AND\s+{}",
            literal_pattern(&date_literal(window.start)),
            literal_pattern(&date_literal(window.end))
        )
    };
    let (Some(any), Some(exact)) = (
        column_matches(sql, column, COMPARISON),
        column_matches(sql, column, &exact_tail),
    ) else {
        return false;
    };
    if exact.is_empty() || any.iter().any(|at| !exact.contains(at)) {
        return false;
    }

    let reversed = format!(
        r"(?i)(?:<=|>=|<>|!=|=|<|>)\s*{}{}`?(?:[^A-Za-z0-9_]|$)",
        QUALIFIER,
        regex::escape(column)
    );
    match Regex::new(&reversed) {
        Ok(re) if !re.is_match(sql) => {}
        _ => return false,
    }

    // literals masked, so OR inside a LIKE pattern is not counted
    let masked = normalize(sql);
    let masked_tail = if window.is_single_day() {
        r"=\s*DATE\s*''"
    } else {
        r"BETWEEN\s+DATE\s*''\s+AND\s+DATE\s*''"
    };
    match column_matches(&masked, column, masked_tail) {
        Some(found) if !found.is_empty() => {
            !found.iter().any(|at| beside_top_level_or(&masked, *at))
        }
        _ => false,
    }
}

/// `DATE 'x'` as a pattern tolerant of spacing and case.
fn literal_pattern(literal: &str) -> String {
    regex::escape(literal).replacen("DATE ", r"DATE\s*", 1)
}

/// Ask the model for SQL answering `question` within `window`.
pub async fn translate(
    provider: &dyn LlmProvider,
    question: &Question,
    window: &DateWindow,
    config: &PipelineConfig,
    catalog: &SchemaCatalog,
    cancel: &CancellationToken,
) -> Result<Translation, TranslationFailure> {
    if !provider.is_available() {
        return Err(TranslationFailure::Unavailable);
    }
    let request = CompletionRequest::new(
        user_prompt(question, window, config),
        CompletionConstraints::sql(),
    )
    .with_system(system_prompt(config, catalog));

    let completed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TranslationFailure::Cancelled),
        out = tokio::time::timeout(config.llm_timeout, provider.complete(request)) => out,
    };
    let raw = match completed {
        Err(_) | Ok(Err(LlmError::Timeout)) => return Err(TranslationFailure::Timeout),
        Ok(Err(LlmError::Unavailable { .. })) => return Err(TranslationFailure::Unavailable),
        Ok(Err(LlmError::Malformed { message })) => {
            return Err(TranslationFailure::Malformed(message))
        }
        Ok(Err(e)) => return Err(TranslationFailure::Provider(e)),
        Ok(Ok(text)) => text,
    };

    let sql = extract_sql(&raw)
        .ok_or_else(|| TranslationFailure::Malformed(truncate_for_log(&raw, 200)))?;
    if !respects_window(&sql, &config.partition_column, window) {
        return Err(TranslationFailure::Malformed(format!(
            "partition filter is not {}",
            window_predicate(&config.partition_column, window)
        )));
    }
    let tables = referenced_tables(&normalize(&sql)).unwrap_or_default();
    tracing::debug!(
        provider = provider.name(),
        model = provider.model(),
        sql = %sql_preview(&sql),
        "model produced candidate"
    );
    Ok(Translation { sql, tables })
}
