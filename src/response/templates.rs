//! Deterministic PT-BR answer templates.

use chamado_core::{
    CellValue, DateWindow, ExecutionErrorKind, ExecutionResult, PipelineFailure, RejectionReason,
};

use crate::router::ChitchatKind;
use crate::utils::text::{format_float_ptbr, format_int_ptbr};

const PREVIEW_ROWS: usize = 10;
const NOT_INFORMED: &str = "(não informado)";

pub const EMPTY_QUESTION_REPLY: &str = "Por favor, forneça uma pergunta.";

const PARTITION_NOTE: &str = "Observação: o filtro de datas usa a data de partição da base (data_particao), que pode diferir da data de abertura do chamado.";

// ============================================================================
// Chitchat
// ============================================================================

pub fn chitchat_reply(kind: ChitchatKind) -> &'static str {
    match kind {
        ChitchatKind::Greeting => "Olá! Tudo bem por aqui. Posso ajudar com perguntas sobre os chamados do 1746, por exemplo: \"Quantos chamados foram abertos no dia 28/11/2024?\"",
        ChitchatKind::Thanks => "Por nada! Se quiser, pergunte algo sobre os chamados do 1746.",
        ChitchatKind::Farewell => "Até logo! Quando precisar, é só perguntar sobre os chamados do 1746.",
        ChitchatKind::OpenEnded => "Posso conversar um pouco, mas minha especialidade são os chamados do 1746 da Prefeitura do Rio. Que tal perguntar, por exemplo, qual o subtipo de chamado mais comum no último ano?",
        ChitchatKind::Empty => EMPTY_QUESTION_REPLY,
    }
}

// ============================================================================
// Formatting
// ============================================================================

pub fn format_date(date: chrono::NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Where the answer applies: `em 28/11/2024`, `entre a e b`, or the defensive
/// trailing window.
pub fn window_phrase(window: &DateWindow, defensive: bool) -> String {
    if defensive {
        return format!(
            "nos últimos {} dias (de {} a {})",
            format_int_ptbr(i64::from(window.days())),
            format_date(window.start),
            format_date(window.end)
        );
    }
    if window.is_single_day() {
        format!("em {}", format_date(window.start))
    } else {
        format!(
            "entre {} e {}",
            format_date(window.start),
            format_date(window.end)
        )
    }
}

/// pt-BR rendering of one cell.
pub fn format_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => NOT_INFORMED.to_string(),
        CellValue::Bool(true) => "sim".to_string(),
        CellValue::Bool(false) => "não".to_string(),
        CellValue::Int(v) => format_int_ptbr(*v),
        CellValue::Float(v) => format_float_ptbr(*v),
        CellValue::Decimal(s) => match s.parse::<i64>() {
            Ok(v) => format_int_ptbr(v),
            Err(_) => s.parse::<f64>().map_or_else(|_| s.clone(), format_float_ptbr),
        },
        CellValue::Date(d) => format_date(*d),
        CellValue::Timestamp(t) => t.format("%d/%m/%Y %H:%M").to_string(),
        CellValue::Text(s) if s.trim().is_empty() => NOT_INFORMED.to_string(),
        CellValue::Text(s) => s.clone(),
    }
}

fn chamados(n: i64) -> String {
    if n == 1 {
        "1 chamado".to_string()
    } else {
        format!("{} chamados", format_int_ptbr(n))
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// Success
// ============================================================================

/// Headline wording per ranking label.
struct RankingWords {
    one: &'static str,
    many: &'static str,
}

fn ranking_words(label: &str) -> Option<RankingWords> {
    let words = match label.to_ascii_lowercase().as_str() {
        "subtipo" => RankingWords {
            one: "o subtipo mais comum",
            many: "subtipos mais comuns",
        },
        "tipo" => RankingWords {
            one: "o tipo mais comum",
            many: "tipos mais comuns",
        },
        "categoria" => RankingWords {
            one: "a categoria mais comum",
            many: "categorias mais comuns",
        },
        "unidade" => RankingWords {
            one: "a unidade organizacional que mais atendeu chamados",
            many: "unidades organizacionais que mais atenderam chamados",
        },
        "bairro" => RankingWords {
            one: "o bairro com mais chamados",
            many: "bairros com mais chamados",
        },
        "status" => RankingWords {
            one: "o status mais frequente",
            many: "status mais frequentes",
        },
        _ => return None,
    };
    Some(words)
}

fn many_article(label: &str) -> &'static str {
    match label.to_ascii_lowercase().as_str() {
        "categoria" | "unidade" => "As",
        _ => "Os",
    }
}

/// Single numeric value of a one-row, one-column result.
fn single_count(result: &ExecutionResult) -> Option<i64> {
    if result.columns.len() != 1 || result.row_count != 1 {
        return None;
    }
    result.cell(0, 0).and_then(CellValue::as_i64)
}

fn count_text(n: i64, phrase: &str) -> String {
    let mut text = if n == 1 {
        format!("Foi aberto 1 chamado {}.", phrase)
    } else {
        format!("Foram abertos {} {}.", chamados(n), phrase)
    };
    if n == 0 {
        text.push(' ');
        text.push_str(PARTITION_NOTE);
    }
    text
}

fn ranking_text(result: &ExecutionResult, phrase: &str) -> Option<String> {
    if result.columns.len() != 2 {
        return None;
    }
    let label = result.columns[0].name.as_str();
    let total_idx = result.column_index("total")?;
    if total_idx != 1 {
        return None;
    }
    let words = ranking_words(label)?;
    let entries: Vec<(String, i64)> = result
        .rows
        .iter()
        .map(|row| {
            let name = row.first().map_or_else(|| NOT_INFORMED.to_string(), format_cell);
            let total = row.get(1).and_then(CellValue::as_i64);
            total.map(|t| (name, t))
        })
        .collect::<Option<Vec<_>>>()?;

    match entries.as_slice() {
        [] => None,
        [(name, total)] => Some(format!(
            "{} {} foi {}, com {}.",
            capitalize(words.one),
            phrase,
            name,
            chamados(*total)
        )),
        many => {
            let mut text = format!(
                "{} {} {} {}:",
                many_article(label),
                many.len(),
                words.many,
                phrase
            );
            for (i, (name, total)) in many.iter().enumerate() {
                text.push_str(&format!("\n{}. {}: {}", i + 1, name, chamados(*total)));
            }
            Some(text)
        }
    }
}

fn preview_text(result: &ExecutionResult, phrase: &str) -> String {
    let mut text = format!(
        "Resultado {} ({} {}):",
        phrase,
        format_int_ptbr(i64::try_from(result.row_count).unwrap_or(i64::MAX)),
        if result.row_count == 1 { "linha" } else { "linhas" }
    );
    for row in result.rows.iter().take(PREVIEW_ROWS) {
        let cells: Vec<String> = result
            .columns
            .iter()
            .zip(row.iter())
            .map(|(col, cell)| format!("{}: {}", col.name, format_cell(cell)))
            .collect();
        text.push_str(&format!("\n- {}", cells.join("; ")));
    }
    if result.row_count > PREVIEW_ROWS {
        text.push_str(&format!(
            "\n... e mais {} linha(s).",
            result.row_count - PREVIEW_ROWS
        ));
    }
    text
}

/// Template answer for a successful execution.
pub fn success_text(result: &ExecutionResult, window: &DateWindow, defensive: bool) -> String {
    let phrase = window_phrase(window, defensive);
    if result.is_empty() {
        return format!("Nenhum chamado encontrado {}. {}", phrase, PARTITION_NOTE);
    }
    if let Some(n) = single_count(result) {
        return count_text(n, &phrase);
    }
    ranking_text(result, &phrase).unwrap_or_else(|| preview_text(result, &phrase))
}

// ============================================================================
// Failure
// ============================================================================

/// Plain explanation of a failure. Never includes engine messages.
pub fn failure_text(failure: &PipelineFailure) -> String {
    let text = match failure {
        PipelineFailure::UnsupportedQuestion => {
            "Não consegui transformar sua pergunta em uma consulta sobre os chamados do 1746. \
             Tente dizer o que deve ser contado ou ranqueado e o período, por exemplo: \
             \"Quantos chamados foram abertos no dia 28/11/2024?\""
        }
        PipelineFailure::RetriesExhausted { last_reason, .. } => match last_reason {
            RejectionReason::OverBudget => {
                "A consulta ultrapassaria o limite de dados processados mesmo após reduzir o período. \
                 Tente um intervalo de datas menor."
            }
            RejectionReason::SyntaxError | RejectionReason::MissingFilter => {
                "Não consegui montar uma consulta válida para essa pergunta. \
                 Tente reformulá-la indicando o período desejado."
            }
            _ => {
                "Não foi possível gerar uma consulta segura para essa pergunta. \
                 Tente reformulá-la de forma mais específica."
            }
        },
        PipelineFailure::Execution(err) => match err.kind {
            ExecutionErrorKind::Timeout => {
                "A consulta demorou mais do que o permitido e foi interrompida. \
                 Tente um período menor."
            }
            ExecutionErrorKind::EngineError => {
                "O serviço de dados não respondeu corretamente agora. \
                 Tente novamente em alguns instantes."
            }
            ExecutionErrorKind::ByteCapExceeded => {
                "A consulta ultrapassaria o limite de dados processados e foi bloqueada. \
                 Tente um período menor."
            }
            ExecutionErrorKind::Cancelled => "A solicitação foi cancelada.",
        },
    };
    text.to_string()
}
