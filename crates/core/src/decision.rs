//! Decision Engine
//!
//! A pure function from `(state, evaluation, completion trigger)` to the next
//! `(action, phase)` pair. It performs no I/O and never mutates its inputs;
//! the session state only changes when the controller applies the result.

use crate::{
    config::RevisionPolicy,
    session::SessionState,
    types::{ActionType, AgentPhase, Decision, ErrorType, EvalResult, Evaluation},
};
use serde::{Deserialize, Serialize};

/// Signals that may end a session early.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTrigger {
    pub all_topics_secure: bool,
    pub user_requested: bool,
}

impl CompletionTrigger {
    pub fn fires(&self) -> bool {
        should_trigger_completion(self.all_topics_secure, self.user_requested)
    }
}

/// Chooses the next action and phase. Rules are applied in priority order;
/// the first that matches wins.
pub fn determine_next_action(
    state: &SessionState,
    evaluation: Option<&Evaluation>,
    completion: Option<CompletionTrigger>,
    policy: &RevisionPolicy,
) -> Decision {
    let phase = state.phase();

    // Terminal phases only ever wind down.
    if phase.is_terminal() {
        return Decision::new(ActionType::CloseSession, AgentPhase::SessionClose);
    }

    if completion.is_some_and(|trigger| trigger.fires()) {
        return Decision::new(ActionType::RunCompletionReview, AgentPhase::CompletionReview);
    }

    // Diagnostic gate: nothing else is reachable until the position is known.
    if !state.is_position_confirmed() {
        return if state.diagnostic_questions_asked() >= policy.min_diagnostic_questions {
            Decision::new(ActionType::InitialQuestion, AgentPhase::KnowledgeIngestion)
        } else {
            Decision::new(ActionType::DiagnosticQuestion, AgentPhase::CurriculumDiagnostic)
        };
    }

    // Confirmed elsewhere, but teaching has not started yet.
    if matches!(phase, AgentPhase::Greeting | AgentPhase::CurriculumDiagnostic) {
        return Decision::new(ActionType::InitialQuestion, AgentPhase::KnowledgeIngestion);
    }

    let evaluation = match evaluation {
        Some(eval) if !eval.is_unknown() => eval,
        _ => {
            return if state.has_open_question() {
                Decision::new(ActionType::AwaitResponse, phase)
            } else {
                Decision::new(ActionType::InitialQuestion, phase)
            };
        }
    };

    match evaluation.result {
        EvalResult::Correct => decide_correct(state, policy),
        EvalResult::Partial => decide_partial(evaluation.error_type),
        EvalResult::Incorrect => decide_incorrect(state, evaluation.error_type, policy),
        EvalResult::Unknown => Decision::new(ActionType::AwaitResponse, phase),
    }
}

fn decide_correct(state: &SessionState, policy: &RevisionPolicy) -> Decision {
    if state.correct_streak >= policy.mastery_streak {
        Decision::new(ActionType::ConfirmMastery, AgentPhase::RecallCheck)
    } else {
        Decision::new(ActionType::ExtendDifficulty, AgentPhase::ActiveRevision)
    }
}

fn decide_partial(error_type: Option<ErrorType>) -> Decision {
    match error_type {
        Some(ErrorType::ExamTechnique) => {
            Decision::new(ActionType::RetryWithHint, AgentPhase::ActiveRevision)
        }
        Some(ErrorType::Confusion) => {
            Decision::new(ActionType::RephraseSimpler, AgentPhase::MisconceptionRepair)
        }
        Some(ErrorType::RecallGap)
        | Some(ErrorType::ConceptGap)
        | Some(ErrorType::Guessing)
        | Some(ErrorType::OffTopic)
        | None => Decision::new(ActionType::RephraseSimpler, AgentPhase::ActiveRevision),
    }
}

fn decide_incorrect(
    state: &SessionState,
    error_type: Option<ErrorType>,
    policy: &RevisionPolicy,
) -> Decision {
    if state.attempts >= policy.panic_attempt_threshold {
        return Decision::new(ActionType::RecoverConfidence, AgentPhase::PanicRecovery);
    }
    match error_type {
        Some(ErrorType::Guessing) if state.attempts >= policy.guessing_attempt_threshold => {
            Decision::new(ActionType::RecoverConfidence, AgentPhase::PanicRecovery)
        }
        Some(ErrorType::Guessing) => {
            Decision::new(ActionType::RephraseSimpler, AgentPhase::ActiveRevision)
        }
        Some(ErrorType::ConceptGap) | Some(ErrorType::Confusion) => {
            Decision::new(ActionType::RephraseSimpler, AgentPhase::MisconceptionRepair)
        }
        Some(ErrorType::RecallGap)
        | Some(ErrorType::ExamTechnique)
        | Some(ErrorType::OffTopic)
        | None => Decision::new(ActionType::RetryWithHint, AgentPhase::ActiveRevision),
    }
}

/// Closed allow-list of actions per phase.
pub fn is_action_allowed_in_phase(action: ActionType, phase: AgentPhase) -> bool {
    use ActionType::*;
    match phase {
        AgentPhase::Greeting => matches!(
            action,
            DiagnosticQuestion | InitialQuestion | AwaitResponse | RunCompletionReview
        ),
        AgentPhase::CurriculumDiagnostic => {
            matches!(action, DiagnosticQuestion | InitialQuestion | RunCompletionReview)
        }
        AgentPhase::KnowledgeIngestion
        | AgentPhase::ActiveRevision
        | AgentPhase::MisconceptionRepair
        | AgentPhase::PanicRecovery
        | AgentPhase::RecallCheck => matches!(
            action,
            InitialQuestion
                | AwaitResponse
                | ExtendDifficulty
                | ConfirmMastery
                | RetryWithHint
                | RephraseSimpler
                | RecoverConfidence
                | RunCompletionReview
        ),
        AgentPhase::CompletionReview | AgentPhase::SessionClose => action == CloseSession,
    }
}

/// True once a recall check has been passed on the current topic.
pub fn should_advance_topic(state: &SessionState, policy: &RevisionPolicy) -> bool {
    state.phase() == AgentPhase::RecallCheck
        && state.correct_streak >= policy.mastery_streak
        && state.last_evaluation.is_some_and(|e| e.is_correct())
}

pub fn should_trigger_completion(all_topics_secure: bool, user_requested: bool) -> bool {
    all_topics_secure || user_requested
}
