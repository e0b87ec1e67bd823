//! Session State
//!
//! The authoritative, serializable record of one revision session. The caller
//! owns persistence; this module only defines the value and the transitions
//! that are allowed to touch it.

use crate::{
    config::RevisionPolicy,
    decision::is_action_allowed_in_phase,
    error::TransitionError,
    types::{ActionType, AgentPhase, Decision, EvalResult, Evaluation},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Progress of one student through one revision session.
///
/// `phase` and `last_action` are private: the only way to move them is
/// [`SessionState::apply_decision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub student_id: String,
    pub topic_id: Option<String>,
    pub topic_name: Option<String>,
    /// Evaluated answers on the current topic.
    pub attempts: u32,
    /// Consecutive correct answers on the current topic.
    pub correct_streak: u32,
    pub last_evaluation: Option<Evaluation>,
    phase: AgentPhase,
    last_action: Option<ActionType>,
    /// The question awaiting an answer. `None` means nothing can be evaluated.
    pub current_question: Option<String>,
    pub expected_answer_hint: Option<String>,
    curriculum_position_confirmed: bool,
    diagnostic_questions_asked: u32,
    /// Set by the caller once every topic in scope is secure.
    #[serde(default)]
    pub topics_secure: bool,
    pub started_at: DateTime<Utc>,
}

/// Creates the state for a brand new session, starting in `greeting`.
pub fn initialize_session(
    session_id: impl Into<String>,
    student_id: impl Into<String>,
    topic_id: Option<String>,
    topic_name: Option<String>,
) -> SessionState {
    SessionState {
        session_id: session_id.into(),
        student_id: student_id.into(),
        topic_id,
        topic_name,
        attempts: 0,
        correct_streak: 0,
        last_evaluation: None,
        phase: AgentPhase::Greeting,
        last_action: None,
        current_question: None,
        expected_answer_hint: None,
        curriculum_position_confirmed: false,
        diagnostic_questions_asked: 0,
        topics_secure: false,
        started_at: Utc::now(),
    }
}

impl SessionState {
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn last_action(&self) -> Option<ActionType> {
        self.last_action
    }

    pub fn is_position_confirmed(&self) -> bool {
        self.curriculum_position_confirmed
    }

    pub fn diagnostic_questions_asked(&self) -> u32 {
        self.diagnostic_questions_asked
    }

    pub fn has_open_question(&self) -> bool {
        self.current_question
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty())
    }

    /// Marks the learner's curriculum position as known without running the
    /// diagnostic, e.g. when it was established in an earlier session.
    pub fn confirm_curriculum_position(&mut self) {
        self.curriculum_position_confirmed = true;
    }

    /// Switches topic. Per-topic counters and the open question are reset.
    pub fn change_topic(&mut self, topic_id: impl Into<String>, topic_name: impl Into<String>) {
        self.topic_id = Some(topic_id.into());
        self.topic_name = Some(topic_name.into());
        self.attempts = 0;
        self.correct_streak = 0;
        self.last_evaluation = None;
        self.close_question();
    }

    /// Records the question extracted from the latest tutor reply.
    pub fn set_current_question(&mut self, question: Option<String>, answer_hint: Option<String>) {
        self.current_question = question;
        self.expected_answer_hint = answer_hint;
    }

    pub fn close_question(&mut self) {
        self.current_question = None;
        self.expected_answer_hint = None;
    }

    /// Folds one evaluation into the counters.
    ///
    /// `unknown` evaluations are remembered but are not attempts, and nothing
    /// counts while the diagnostic gate is still closed.
    pub fn record_evaluation(&mut self, evaluation: &Evaluation) {
        self.last_evaluation = Some(*evaluation);
        if !self.curriculum_position_confirmed || evaluation.is_unknown() {
            return;
        }
        self.attempts += 1;
        if evaluation.result == EvalResult::Correct {
            self.correct_streak += 1;
        } else {
            self.correct_streak = 0;
        }
        debug!(
            attempts = self.attempts,
            correct_streak = self.correct_streak,
            "Counters updated"
        );
    }

    /// Applies a decision. This is the only path that changes `phase`.
    ///
    /// An unconfirmed session may only leave placement through
    /// `INITIAL_QUESTION` into `knowledge_ingestion`, and only once
    /// `policy.min_diagnostic_questions` placement questions were asked.
    pub fn apply_decision(
        &mut self,
        decision: Decision,
        policy: &RevisionPolicy,
    ) -> Result<(), TransitionError> {
        if !is_action_allowed_in_phase(decision.action, self.phase) {
            return Err(TransitionError::ActionNotAllowed {
                action: decision.action,
                phase: self.phase,
            });
        }

        let leaves_diagnostic = decision.action == ActionType::InitialQuestion
            && decision.next_phase == AgentPhase::KnowledgeIngestion
            && matches!(
                self.phase,
                AgentPhase::Greeting | AgentPhase::CurriculumDiagnostic
            );
        let gate_open = self.curriculum_position_confirmed
            || (leaves_diagnostic
                && self.diagnostic_questions_asked >= policy.min_diagnostic_questions);
        if decision.next_phase.requires_confirmed_position() && !gate_open {
            return Err(TransitionError::DiagnosticGate {
                phase: decision.next_phase,
            });
        }

        match decision.action {
            ActionType::DiagnosticQuestion => self.diagnostic_questions_asked += 1,
            ActionType::InitialQuestion if leaves_diagnostic => {
                self.curriculum_position_confirmed = true;
                self.attempts = 0;
                self.correct_streak = 0;
            }
            _ => {}
        }

        self.phase = decision.next_phase;
        self.last_action = Some(decision.action);
        Ok(())
    }
}

#[cfg(test)]
impl SessionState {
    pub(crate) fn in_phase(phase: AgentPhase) -> Self {
        let mut state = initialize_session("s-1", "student-1", Some("t-1".into()), Some("Quadratics".into()));
        state.phase = phase;
        state.curriculum_position_confirmed = phase.requires_confirmed_position()
            || matches!(phase, AgentPhase::CompletionReview | AgentPhase::SessionClose);
        state
    }
}
