//! Response Synthesizer
//!
//! Turns the terminal state of a request into answer text. `render` never
//! fails and never returns empty text:
//!
//! - chitchat: model reply when available, canned reply otherwise
//! - success: model summary if every number in it is grounded, template
//!   otherwise
//! - failure: template only, built from the failure kind
//!
//! Grounded means each number in the summary appears in the result cells, the
//! question, the applied window, the row count or as a rank position.

pub mod templates;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chamado_core::{AnswerSource, DateWindow, ExecutionResult, PipelineFailure, Question};
use chamado_llm::{CompletionConstraints, CompletionRequest, LlmError, LlmProvider};
use chrono::Datelike;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::router::{chitchat_kind, ChitchatKind};
use crate::utils::text::truncate_for_log;
use templates::{chitchat_reply, failure_text, format_cell, success_text, window_phrase};

const SUMMARY_ROWS: usize = 20;

/// What to answer.
#[derive(Debug, Clone, Copy)]
pub enum RenderInput<'a> {
    Chitchat {
        question: &'a Question,
    },
    Success {
        question: &'a Question,
        result: &'a ExecutionResult,
        window: DateWindow,
        defensive_window: bool,
    },
    Failure {
        failure: &'a PipelineFailure,
    },
}

/// Final text and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub source: AnswerSource,
    /// The model was asked and its output was not used
    pub llm_fallback: bool,
}

pub struct ResponseSynthesizer {
    provider: Arc<dyn LlmProvider>,
    llm_enabled: bool,
    llm_timeout: Duration,
    max_tokens: u32,
}

impl ResponseSynthesizer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        llm_enabled: bool,
        llm_timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            llm_enabled,
            llm_timeout,
            max_tokens,
        }
    }

    fn model_usable(&self) -> bool {
        self.llm_enabled && self.provider.is_available()
    }

    pub async fn render(&self, input: RenderInput<'_>, cancel: &CancellationToken) -> Rendered {
        match input {
            RenderInput::Chitchat { question } => self.render_chitchat(question, cancel).await,
            RenderInput::Success {
                question,
                result,
                window,
                defensive_window,
            } => {
                self.render_success(question, result, &window, defensive_window, cancel)
                    .await
            }
            RenderInput::Failure { failure } => Rendered {
                text: failure_text(failure),
                source: AnswerSource::FallbackTemplate,
                llm_fallback: false,
            },
        }
    }

    async fn render_chitchat(&self, question: &Question, cancel: &CancellationToken) -> Rendered {
        let kind = chitchat_kind(question);
        let canned = |llm_fallback| Rendered {
            text: chitchat_reply(kind).to_string(),
            source: AnswerSource::Chitchat,
            llm_fallback,
        };
        if kind == ChitchatKind::Empty || !self.model_usable() {
            return canned(false);
        }
        let request = CompletionRequest::new(
            question.as_str(),
            CompletionConstraints::text(self.max_tokens),
        )
        .with_system(
            "Você é um assistente simpático da Prefeitura do Rio que responde sobre os chamados do 1746. \
             Responda em português, em no máximo três frases, sem inventar dados.",
        );
        match self.complete(request, cancel).await {
            Some(text) => Rendered {
                text,
                source: AnswerSource::Chitchat,
                llm_fallback: false,
            },
            None => canned(true),
        }
    }

    async fn render_success(
        &self,
        question: &Question,
        result: &ExecutionResult,
        window: &DateWindow,
        defensive: bool,
        cancel: &CancellationToken,
    ) -> Rendered {
        let template = |llm_fallback| Rendered {
            text: success_text(result, window, defensive),
            source: AnswerSource::FallbackTemplate,
            llm_fallback,
        };
        if !self.model_usable() || result.is_empty() {
            return template(false);
        }
        let request = CompletionRequest::new(
            summary_prompt(question, result, window, defensive),
            CompletionConstraints::text(self.max_tokens),
        )
        .with_system(
            "Resuma o resultado em português, em uma ou duas frases. Use apenas os números presentes nos dados. \
             Formate números com ponto como separador de milhar e datas como dd/mm/aaaa.",
        );
        let Some(summary) = self.complete(request, cancel).await else {
            return template(true);
        };
        if !is_grounded(&summary, question, result, window) {
            tracing::warn!(
                summary = %truncate_for_log(&summary, 200),
                "model summary has ungrounded numbers, using template"
            );
            return template(true);
        }
        Rendered {
            text: summary,
            source: AnswerSource::Llm,
            llm_fallback: false,
        }
    }

    /// Bounded model call. `None` on any failure, timeout, cancellation or
    /// blank output.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let out = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            out = tokio::time::timeout(self.llm_timeout, self.provider.complete(request)) => out,
        };
        match out {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(Ok(_)) => None,
            Ok(Err(LlmError::Unavailable { message })) => {
                tracing::debug!(provider = self.provider.name(), reason = %message, "model unavailable");
                None
            }
            Ok(Err(LlmError::RateLimited { retry_after })) => {
                tracing::warn!(provider = self.provider.name(), retry_after = ?retry_after, "model rate limited");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "model reply failed");
                None
            }
            Err(_) => {
                tracing::warn!(provider = self.provider.name(), "model reply timed out");
                None
            }
        }
    }
}

fn summary_prompt(
    question: &Question,
    result: &ExecutionResult,
    window: &DateWindow,
    defensive: bool,
) -> String {
    let header: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    let mut prompt = format!(
        "Pergunta: {}\nPeríodo: {}\nColunas: {}\nLinhas:",
        question,
        window_phrase(window, defensive),
        header.join(" | ")
    );
    for row in result.rows.iter().take(SUMMARY_ROWS) {
        let cells: Vec<String> = row.iter().map(format_cell).collect();
        prompt.push_str(&format!("\n{}", cells.join(" | ")));
    }
    prompt
}

// ============================================================================
// Grounding
// ============================================================================

fn number_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)*").ok()).as_ref()
}

/// Digits only, without leading zeros (`"12.345"` -> `"12345"`, `"08"` -> `"8"`).
fn canonical_number(token: &str) -> String {
    let digits: String = token.chars().filter(char::is_ascii_digit).collect();
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn numbers_in(text: &str) -> Vec<String> {
    number_pattern().map_or_else(Vec::new, |re| {
        re.find_iter(text)
            .map(|m| canonical_number(m.as_str()))
            .collect()
    })
}

fn allowed_numbers(
    question: &Question,
    result: &ExecutionResult,
    window: &DateWindow,
) -> HashSet<String> {
    let mut allowed: HashSet<String> = HashSet::new();
    for row in &result.rows {
        for cell in row {
            allowed.extend(numbers_in(&cell.to_plain_string()));
            allowed.extend(numbers_in(&format_cell(cell)));
        }
    }
    allowed.extend(numbers_in(question.as_str()));
    for date in [window.start, window.end] {
        allowed.insert(date.day().to_string());
        allowed.insert(date.month().to_string());
        allowed.insert(date.year().to_string());
    }
    allowed.insert(window.days().to_string());
    for rank in 0..=result.row_count {
        allowed.insert(rank.to_string());
    }
    allowed
}

/// Whether every number in `summary` is backed by the inputs.
pub fn is_grounded(
    summary: &str,
    question: &Question,
    result: &ExecutionResult,
    window: &DateWindow,
) -> bool {
    if number_pattern().is_none() {
        return false;
    }
    let allowed = allowed_numbers(question, result, window);
    numbers_in(summary).iter().all(|n| allowed.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chamado_core::{CellValue, Column, ColumnType};
    use chamado_llm::{LlmResult, LocalStubProvider, ProviderConfig};
    use chrono::NaiveDate;

    struct Reply {
        text: String,
        config: ProviderConfig,
    }

    #[async_trait]
    impl LlmProvider for Reply {
        fn name(&self) -> &'static str {
            "reply"
        }

        fn model(&self) -> &str {
            "reply-1"
        }

        async fn complete(&self, _request: CompletionRequest) -> LlmResult<String> {
            Ok(self.text.clone())
        }

        fn config(&self) -> &ProviderConfig {
            &self.config
        }
    }

    fn responder(text: &str) -> ResponseSynthesizer {
        let provider = Arc::new(Reply {
            text: text.to_string(),
            config: ProviderConfig::default(),
        });
        ResponseSynthesizer::new(provider, true, Duration::from_secs(5), 200)
    }

    fn offline() -> ResponseSynthesizer {
        ResponseSynthesizer::new(
            Arc::new(LocalStubProvider::new("test")),
            false,
            Duration::from_secs(5),
            200,
        )
    }

    fn day() -> DateWindow {
        DateWindow::single_day(NaiveDate::from_ymd_opt(2024, 11, 28).unwrap())
    }

    fn top_bairros() -> ExecutionResult {
        ExecutionResult::new(
            vec![
                Column::new("bairro", ColumnType::Text),
                Column::new("total", ColumnType::Integer),
            ],
            vec![
                vec![CellValue::Text("Campo Grande".into()), CellValue::Int(12_345)],
                vec![CellValue::Text("Bangu".into()), CellValue::Int(98)],
            ],
            1,
            1,
        )
    }

    #[test]
    fn test_grounding_accepts_result_numbers() {
        let q = Question::new("Quais os 2 bairros com mais chamados no dia 28/11/2024?");
        assert!(is_grounded(
            "Em 28/11/2024, os 2 bairros foram Campo Grande (12.345) e Bangu (98).",
            &q,
            &top_bairros(),
            &day()
        ));
    }

    #[test]
    fn test_grounding_rejects_invented_numbers() {
        let q = Question::new("Quais bairros?");
        assert!(!is_grounded(
            "Campo Grande teve 15.000 chamados.",
            &q,
            &top_bairros(),
            &day()
        ));
    }

    #[tokio::test]
    async fn test_grounded_summary_is_used() {
        let q = Question::new("Quais os 2 bairros com mais chamados no dia 28/11/2024?");
        let result = top_bairros();
        let out = responder("Campo Grande lidera com 12.345 chamados, seguido de Bangu com 98.")
            .render(
                RenderInput::Success {
                    question: &q,
                    result: &result,
                    window: day(),
                    defensive_window: false,
                },
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.source, AnswerSource::Llm);
        assert!(!out.llm_fallback);
    }

    #[tokio::test]
    async fn test_ungrounded_summary_falls_back() {
        let q = Question::new("Quais bairros?");
        let result = top_bairros();
        let out = responder("Foram 777 chamados no total.")
            .render(
                RenderInput::Success {
                    question: &q,
                    result: &result,
                    window: day(),
                    defensive_window: false,
                },
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out.source, AnswerSource::FallbackTemplate);
        assert!(out.llm_fallback);
        assert!(out.text.contains("Campo Grande: 12.345 chamados"));
    }

    #[tokio::test]
    async fn test_blank_model_chitchat_uses_canned_reply() {
        let q = Question::new("Olá, tudo bem?");
        let out = responder("   ")
            .render(RenderInput::Chitchat { question: &q }, &CancellationToken::new())
            .await;
        assert_eq!(out.source, AnswerSource::Chitchat);
        assert!(out.text.starts_with("Olá!"));
        assert!(out.llm_fallback);
    }

    #[tokio::test]
    async fn test_empty_question_reply() {
        let q = Question::new("   ");
        let out = responder("ignored")
            .render(RenderInput::Chitchat { question: &q }, &CancellationToken::new())
            .await;
        assert_eq!(out.text, templates::EMPTY_QUESTION_REPLY);
    }

    #[tokio::test]
    async fn test_failure_never_uses_model() {
        let failure = PipelineFailure::UnsupportedQuestion;
        let out = responder("qualquer coisa")
            .render(RenderInput::Failure { failure: &failure }, &CancellationToken::new())
            .await;
        assert_eq!(out.source, AnswerSource::FallbackTemplate);
        assert!(!out.text.is_empty());
    }

    #[tokio::test]
    async fn test_offline_count_uses_template() {
        let q = Question::new("Quantos chamados foram abertos no dia 28/11/2024?");
        let result = ExecutionResult::new(
            vec![Column::new("total", ColumnType::Integer)],
            vec![vec![CellValue::Int(0)]],
            1,
            1,
        );
        let out = offline()
            .render(
                RenderInput::Success {
                    question: &q,
                    result: &result,
                    window: day(),
                    defensive_window: false,
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(out.text.starts_with("Foram abertos 0 chamados em 28/11/2024."));
    }
}
