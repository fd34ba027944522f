//! Intent Router
//!
//! Decides whether a question needs data. The decision is a pure function of
//! the question text and the fixed keyword tables below:
//!
//! - any dataset vocabulary (counts, rankings, entities, time expressions,
//!   service-request topics) routes to `data`
//! - otherwise a recognized conversational form routes to `chitchat`
//! - anything else is ambiguous and defaults to `data`

use std::sync::OnceLock;

use chamado_core::{Intent, Question};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::text::{fold, words};

/// Shape of a conversational message, used to pick a canned reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChitchatKind {
    Greeting,
    Thanks,
    Farewell,
    /// Non-analytical request ("me dê sugestões de ...")
    OpenEnded,
    Empty,
}

// ============================================================================
// Keyword tables (folded: lowercase, no diacritics)
// ============================================================================

/// Single words that signal dataset semantics.
const DATA_WORDS: &[&str] = &[
    "chamado", "chamados", "quantos", "quantas", "quantidade", "contagem", "total", "totais",
    "ranking", "top", "principais", "maiores", "bairro", "bairros", "subtipo", "subtipos", "tipo",
    "tipos", "categoria", "categorias", "unidade", "unidades", "organizacional", "orgao",
    "orgaos", "secretaria", "1746", "reclamacao", "reclamacoes", "solicitacao", "solicitacoes",
    "ocorrencia", "ocorrencias", "iluminacao", "buraco", "buracos", "poda", "entulho",
    "estacionamento", "vazamento", "lampada", "reparo", "fiscalizacao", "abertos", "abertas",
    "aberto", "atendeu", "atendidos", "status", "ultimos", "ultimas", "ontem", "hoje", "janeiro",
    "fevereiro", "marco", "abril", "maio", "junho", "julho", "agosto", "setembro", "outubro",
    "novembro", "dezembro",
];

/// Multi-word phrases that signal dataset semantics.
const DATA_PHRASES: &[&str] = &[
    "mais comum",
    "mais comuns",
    "mais frequente",
    "mais chamados",
    "numero de",
    "por bairro",
    "por mes",
    "por ano",
];

const GREETINGS: &[&str] = &[
    "oi", "ola", "bom dia", "boa tarde", "boa noite", "hello", "hi", "hey", "e ai", "tudo bem",
    "como vai", "tudo bom",
];

const THANKS: &[&str] = &["obrigado", "obrigada", "valeu", "agradeco", "thanks", "brigado"];

const FAREWELLS: &[&str] = &["tchau", "ate logo", "ate mais", "adeus", "bye", "falou"];

const OPEN_ENDED: &[&str] = &[
    "sugestao", "sugestoes", "brincadeira", "brincadeiras", "piada", "piadas", "conte uma",
    "quem e voce", "quem voce e", "o que voce faz", "receita", "ideias", "dicas", "poema",
    "me ajude a escrever",
];

fn date_like() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b|\b(?:19|20)\d{2}\b").ok())
        .as_ref()
}

/// Whether `phrase` occurs in `folded` on word boundaries.
fn contains_phrase(folded_words: &[&str], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    folded_words
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

fn matches_any(folded_words: &[&str], table: &[&str]) -> bool {
    table.iter().any(|p| contains_phrase(folded_words, p))
}

/// Whether the text references dataset semantics.
pub fn has_data_vocabulary(text: &str) -> bool {
    let folded = fold(text);
    let ws = words(&folded);
    if ws.iter().any(|w| DATA_WORDS.contains(w)) || matches_any(&ws, DATA_PHRASES) {
        return true;
    }
    date_like().is_some_and(|re| re.is_match(&folded))
}

/// Conversational shape of the text, if it has one.
fn conversational_kind(text: &str) -> Option<ChitchatKind> {
    let folded = fold(text);
    let ws = words(&folded);
    if ws.is_empty() {
        return Some(ChitchatKind::Empty);
    }
    if matches_any(&ws, OPEN_ENDED) {
        return Some(ChitchatKind::OpenEnded);
    }
    if matches_any(&ws, THANKS) {
        return Some(ChitchatKind::Thanks);
    }
    if matches_any(&ws, FAREWELLS) {
        return Some(ChitchatKind::Farewell);
    }
    if matches_any(&ws, GREETINGS) {
        return Some(ChitchatKind::Greeting);
    }
    None
}

// ============================================================================
// Public API
// ============================================================================

/// Classify a question.
pub fn classify(question: &Question) -> Intent {
    let text = question.as_str();
    if question.is_empty() {
        return Intent::Chitchat;
    }
    if has_data_vocabulary(text) {
        return Intent::Data;
    }
    match conversational_kind(text) {
        Some(_) => Intent::Chitchat,
        None => {
            tracing::debug!(question = %text, "routing ambiguous, defaulting to data");
            Intent::Data
        }
    }
}

/// Conversational kind for replies. Unrecognized text counts as open-ended.
pub fn chitchat_kind(question: &Question) -> ChitchatKind {
    if question.is_empty() {
        return ChitchatKind::Empty;
    }
    conversational_kind(question.as_str()).unwrap_or(ChitchatKind::OpenEnded)
}
