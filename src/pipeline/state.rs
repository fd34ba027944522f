//! Pipeline states and their allowed transitions.
//!
//! ```text
//! Route ──► Synthesize ──► Validate ──► Execute ──► Respond ──► Done
//!   │           │  ▲           │                       ▲
//!   │           │  └─ retry ───┤                       │
//!   └───────────┴──────────────┴───────────────────────┘
//! ```
//!
//! Each state's exits are listed in `StateKind::successors`, and the driver
//! refuses any step that is not on the list.

use chamado_core::{AnswerSource, DateWindow, PipelineFailure, QueryCandidate};
use chamado_guard::ValidatedQuery;
use serde::Serialize;

/// How the data path ended, carried into `Respond`.
#[derive(Debug, Clone)]
pub enum Outcome {
    Chitchat,
    /// The result itself lives in the request context
    Success {
        window: DateWindow,
        defensive_window: bool,
    },
    Failure(PipelineFailure),
}

#[derive(Debug, Clone)]
pub enum PipelineState {
    Route,
    Synthesize {
        attempt: u32,
    },
    Validate {
        candidate: QueryCandidate,
        defensive_window: bool,
    },
    Execute {
        query: ValidatedQuery,
        defensive_window: bool,
    },
    Respond {
        outcome: Outcome,
    },
    Done {
        text: String,
        source: AnswerSource,
    },
}

/// Discriminant of `PipelineState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Route,
    Synthesize,
    Validate,
    Execute,
    Respond,
    Done,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateKind::Route => "route",
            StateKind::Synthesize => "synthesize",
            StateKind::Validate => "validate",
            StateKind::Execute => "execute",
            StateKind::Respond => "respond",
            StateKind::Done => "done",
        };
        f.write_str(s)
    }
}

impl StateKind {
    /// States reachable in one step.
    pub fn successors(self) -> &'static [StateKind] {
        match self {
            StateKind::Route => &[StateKind::Synthesize, StateKind::Respond],
            StateKind::Synthesize => &[StateKind::Validate, StateKind::Respond],
            StateKind::Validate => &[StateKind::Execute, StateKind::Synthesize, StateKind::Respond],
            StateKind::Execute => &[StateKind::Respond],
            StateKind::Respond => &[StateKind::Done],
            StateKind::Done => &[],
        }
    }

    pub fn can_reach(self, next: StateKind) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

impl PipelineState {
    pub fn kind(&self) -> StateKind {
        match self {
            PipelineState::Route => StateKind::Route,
            PipelineState::Synthesize { .. } => StateKind::Synthesize,
            PipelineState::Validate { .. } => StateKind::Validate,
            PipelineState::Execute { .. } => StateKind::Execute,
            PipelineState::Respond { .. } => StateKind::Respond,
            PipelineState::Done { .. } => StateKind::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [StateKind; 6] = [
        StateKind::Route,
        StateKind::Synthesize,
        StateKind::Validate,
        StateKind::Execute,
        StateKind::Respond,
        StateKind::Done,
    ];

    #[test]
    fn test_only_done_is_terminal() {
        for kind in ALL {
            assert_eq!(kind.is_terminal(), kind == StateKind::Done, "{}", kind);
        }
    }

    #[test]
    fn test_execute_is_only_reachable_from_validate() {
        for kind in ALL {
            assert_eq!(kind.can_reach(StateKind::Execute), kind == StateKind::Validate);
        }
    }

    #[test]
    fn test_every_state_reaches_done() {
        for start in ALL {
            let mut frontier = vec![start];
            let mut seen = Vec::new();
            while let Some(k) = frontier.pop() {
                if seen.contains(&k) {
                    continue;
                }
                seen.push(k);
                frontier.extend_from_slice(k.successors());
            }
            assert!(seen.contains(&StateKind::Done), "{} cannot finish", start);
        }
    }

    #[test]
    fn test_no_state_returns_to_route() {
        for kind in ALL {
            assert!(!kind.can_reach(StateKind::Route));
        }
    }
}
