//! Acceptance question set, runnable with `chamado-agent --acceptance`.

use chamado_core::Intent;

#[derive(Debug, Clone, Copy)]
pub struct AcceptanceQuestion {
    pub text: &'static str,
    pub expected_intent: Intent,
}

pub const ACCEPTANCE_QUESTIONS: &[AcceptanceQuestion] = &[
    AcceptanceQuestion {
        text: "Quantos chamados foram abertos no dia 28/11/2024?",
        expected_intent: Intent::Data,
    },
    AcceptanceQuestion {
        text: "Qual o subtipo de chamado mais comum relacionado a Iluminação Pública?",
        expected_intent: Intent::Data,
    },
    AcceptanceQuestion {
        text: "Quais os 3 bairros que mais tiveram chamados abertos sobre reparo de buraco em 2023?",
        expected_intent: Intent::Data,
    },
    AcceptanceQuestion {
        text: "Qual o nome da unidade organizacional que mais atendeu chamados de Fiscalização de estacionamento irregular?",
        expected_intent: Intent::Data,
    },
    AcceptanceQuestion {
        text: "Olá, tudo bem?",
        expected_intent: Intent::Chitchat,
    },
    AcceptanceQuestion {
        text: "Me dê sugestões de brincadeiras para fazer com meu cachorro!",
        expected_intent: Intent::Chitchat,
    },
];
