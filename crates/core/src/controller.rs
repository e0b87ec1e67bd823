//! Revision Session Controller
//!
//! Orchestrates one turn: classify meta requests, evaluate when a question is
//! open, update counters, decide, apply the decision and render instructions.
//! Invoking generation, persisting the state and parsing the next question
//! are left to the caller.

use crate::{
    config::RevisionPolicy,
    decision::{CompletionTrigger, determine_next_action, should_advance_topic},
    delivery::{ModalityProfile, Technique, get_allowed_techniques},
    evaluator::{EvaluationRequest, Evaluator, MetaRequest, classify_meta_request},
    instructions::{InstructionContext, build_instructions, extract_next_question, strip_answer_marker},
    llm_client::CompletionClient,
    session::SessionState,
    types::{ActionType, AgentPhase, Decision, Evaluation},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Everything a caller needs after one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub action: ActionType,
    pub instructions: String,
    pub updated_state: SessionState,
    pub updated_phase: AgentPhase,
    pub evaluation: Option<Evaluation>,
    pub meta_request: Option<MetaRequest>,
    /// The learner just passed a recall check; the caller may pick a new topic.
    pub advance_topic: bool,
    pub allowed_techniques: BTreeSet<Technique>,
}

/// Result of folding one evaluation into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SettledTurn {
    pub decision: Decision,
    pub advance_topic: bool,
}

pub(crate) fn completion_trigger(state: &SessionState, meta: Option<MetaRequest>) -> CompletionTrigger {
    CompletionTrigger {
        all_topics_secure: state.topics_secure,
        user_requested: meta == Some(MetaRequest::Completion),
    }
}

/// Whether the outcome of evaluation can change this turn's decision.
pub(crate) fn evaluation_decides(state: &SessionState, meta: Option<MetaRequest>) -> bool {
    state.is_position_confirmed()
        && !state.phase().is_terminal()
        && !matches!(
            state.phase(),
            AgentPhase::Greeting | AgentPhase::CurriculumDiagnostic
        )
        && !completion_trigger(state, meta).fires()
}

/// Whether the learner's message is graded this turn.
pub(crate) fn should_evaluate(state: &SessionState, meta: Option<MetaRequest>) -> bool {
    meta.is_none() && state.has_open_question() && evaluation_decides(state, meta)
}

/// The decision this turn will reach when no evaluation is involved.
pub(crate) fn preview_decision(
    state: &SessionState,
    meta: Option<MetaRequest>,
    policy: &RevisionPolicy,
) -> Decision {
    let mut preview = state.clone();
    if meta == Some(MetaRequest::Skip) {
        preview.close_question();
    }
    determine_next_action(&preview, None, Some(completion_trigger(&preview, meta)), policy)
}

/// Steps 2 to 4 of a turn: update counters, decide, apply.
///
/// A decision the state rejects is logged and replaced by `AWAIT_RESPONSE`
/// in the current phase without touching the state.
pub(crate) fn settle_turn(
    state: &mut SessionState,
    evaluation: Option<&Evaluation>,
    meta: Option<MetaRequest>,
    policy: &RevisionPolicy,
) -> SettledTurn {
    if let Some(eval) = evaluation {
        state.record_evaluation(eval);
    }
    if meta == Some(MetaRequest::Skip) {
        state.close_question();
    }

    let advance_topic = should_advance_topic(state, policy);
    let decision = determine_next_action(
        state,
        evaluation,
        Some(completion_trigger(state, meta)),
        policy,
    );

    match state.apply_decision(decision, policy) {
        Ok(()) => SettledTurn {
            decision,
            advance_topic,
        },
        Err(e) => {
            error!(error = %e, "Decision rejected by session state");
            SettledTurn {
                decision: Decision::new(ActionType::AwaitResponse, state.phase()),
                advance_topic: false,
            }
        }
    }
}

/// Records the question left open by a generated reply and returns the text
/// to show the learner.
pub fn absorb_generated_reply(state: &mut SessionState, generated_text: &str) -> String {
    let next = extract_next_question(generated_text);
    match state.last_action() {
        Some(ActionType::RunCompletionReview) | Some(ActionType::CloseSession) => state.close_question(),
        _ if next.question.is_some() => {
            // A re-asked question keeps its hidden answer.
            let hint = next.answer_hint.or_else(|| {
                (next.question == state.current_question)
                    .then(|| state.expected_answer_hint.clone())
                    .flatten()
            });
            state.set_current_question(next.question, hint);
        }
        _ => {}
    }
    strip_answer_marker(generated_text)
}

/// The only component callers drive directly.
pub struct RevisionController {
    evaluator: Evaluator,
    policy: RevisionPolicy,
}

impl RevisionController {
    pub fn new(client: Arc<dyn CompletionClient>, policy: RevisionPolicy) -> Self {
        Self {
            evaluator: Evaluator::new(client, policy.numeric_tolerance),
            policy,
        }
    }

    pub fn policy(&self) -> &RevisionPolicy {
        &self.policy
    }

    /// Runs one turn of the pipeline and returns the state to persist together
    /// with the directive for the external generation call.
    #[instrument(name = "process_turn", skip_all, fields(session_id = %state.session_id))]
    pub async fn process_turn(
        &self,
        student_message: &str,
        mut state: SessionState,
        modality_profile: Option<&ModalityProfile>,
        subject_name: &str,
    ) -> TurnOutcome {
        let meta_request = classify_meta_request(student_message);

        let evaluation = if should_evaluate(&state, meta_request) {
            Some(
                self.evaluator
                    .evaluate_answer(EvaluationRequest {
                        student_answer: student_message,
                        current_question: state.current_question.as_deref(),
                        expected_answer_hint: state.expected_answer_hint.as_deref(),
                        topic_name: state.topic_name.as_deref(),
                    })
                    .await,
            )
        } else {
            None
        };

        let settled = settle_turn(&mut state, evaluation.as_ref(), meta_request, &self.policy);

        let allowed_techniques = get_allowed_techniques(modality_profile);
        let instructions = build_instructions(&InstructionContext {
            decision: settled.decision,
            state: &state,
            evaluation: evaluation.as_ref(),
            techniques: &allowed_techniques,
            subject_name,
            meta_request,
        });

        info!(
            action = %settled.decision.action,
            phase = %state.phase(),
            attempts = state.attempts,
            correct_streak = state.correct_streak,
            "Turn processed"
        );

        TurnOutcome {
            action: settled.decision.action,
            instructions,
            updated_phase: state.phase(),
            updated_state: state,
            evaluation,
            meta_request,
            advance_topic: settled.advance_topic,
            allowed_techniques,
        }
    }
}
