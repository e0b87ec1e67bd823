//! Closed vocabularies shared by every component of the session controller.
//!
//! Actions, phases and the three evaluation fields are modelled as exhaustive
//! enums so that adding a variant forces every dispatch site to be revisited.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The pedagogical move the decision engine has chosen for the next tutor reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Ask one placement question while the curriculum position is unknown.
    DiagnosticQuestion,
    /// Open a fresh question on the current topic.
    InitialQuestion,
    /// Keep the current question open and wait for a real attempt.
    AwaitResponse,
    /// The answer was right; raise the difficulty.
    ExtendDifficulty,
    /// Repeated correct answers; check recall before moving on.
    ConfirmMastery,
    /// Same question again with a targeted hint.
    RetryWithHint,
    /// Re-ask the idea in simpler terms.
    RephraseSimpler,
    /// The learner is struggling; rebuild confidence before continuing.
    RecoverConfidence,
    /// Summarise the session and what is secure.
    RunCompletionReview,
    /// Say goodbye; nothing further is taught.
    CloseSession,
}

impl ActionType {
    /// Every action, in declaration order.
    pub const ALL: [ActionType; 10] = [
        ActionType::DiagnosticQuestion,
        ActionType::InitialQuestion,
        ActionType::AwaitResponse,
        ActionType::ExtendDifficulty,
        ActionType::ConfirmMastery,
        ActionType::RetryWithHint,
        ActionType::RephraseSimpler,
        ActionType::RecoverConfidence,
        ActionType::RunCompletionReview,
        ActionType::CloseSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::DiagnosticQuestion => "DIAGNOSTIC_QUESTION",
            ActionType::InitialQuestion => "INITIAL_QUESTION",
            ActionType::AwaitResponse => "AWAIT_RESPONSE",
            ActionType::ExtendDifficulty => "EXTEND_DIFFICULTY",
            ActionType::ConfirmMastery => "CONFIRM_MASTERY",
            ActionType::RetryWithHint => "RETRY_WITH_HINT",
            ActionType::RephraseSimpler => "REPHRASE_SIMPLER",
            ActionType::RecoverConfidence => "RECOVER_CONFIDENCE",
            ActionType::RunCompletionReview => "RUN_COMPLETION_REVIEW",
            ActionType::CloseSession => "CLOSE_SESSION",
        }
    }

    /// Whether the tutor reply for this action must end with a new open question.
    pub fn asks_new_question(&self) -> bool {
        matches!(
            self,
            ActionType::DiagnosticQuestion
                | ActionType::InitialQuestion
                | ActionType::ExtendDifficulty
                | ActionType::ConfirmMastery
                | ActionType::RephraseSimpler
                | ActionType::RecoverConfidence
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a session in the tutoring state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Greeting,
    CurriculumDiagnostic,
    KnowledgeIngestion,
    ActiveRevision,
    MisconceptionRepair,
    PanicRecovery,
    RecallCheck,
    CompletionReview,
    SessionClose,
}

impl AgentPhase {
    pub const ALL: [AgentPhase; 9] = [
        AgentPhase::Greeting,
        AgentPhase::CurriculumDiagnostic,
        AgentPhase::KnowledgeIngestion,
        AgentPhase::ActiveRevision,
        AgentPhase::MisconceptionRepair,
        AgentPhase::PanicRecovery,
        AgentPhase::RecallCheck,
        AgentPhase::CompletionReview,
        AgentPhase::SessionClose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPhase::Greeting => "greeting",
            AgentPhase::CurriculumDiagnostic => "curriculum_diagnostic",
            AgentPhase::KnowledgeIngestion => "knowledge_ingestion",
            AgentPhase::ActiveRevision => "active_revision",
            AgentPhase::MisconceptionRepair => "misconception_repair",
            AgentPhase::PanicRecovery => "panic_recovery",
            AgentPhase::RecallCheck => "recall_check",
            AgentPhase::CompletionReview => "completion_review",
            AgentPhase::SessionClose => "session_close",
        }
    }

    /// Phases that may only be entered once the curriculum position is confirmed.
    pub fn requires_confirmed_position(&self) -> bool {
        match self {
            AgentPhase::KnowledgeIngestion
            | AgentPhase::ActiveRevision
            | AgentPhase::MisconceptionRepair
            | AgentPhase::PanicRecovery
            | AgentPhase::RecallCheck => true,
            AgentPhase::Greeting
            | AgentPhase::CurriculumDiagnostic
            | AgentPhase::CompletionReview
            | AgentPhase::SessionClose => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentPhase::CompletionReview | AgentPhase::SessionClose)
    }
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvalResult {
    Correct,
    Partial,
    Incorrect,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Why an answer fell short. `OffTopic` is reserved for meta responses that
/// were never graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    RecallGap,
    ConceptGap,
    Confusion,
    ExamTechnique,
    Guessing,
    OffTopic,
}

/// Structured classification of one student answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Evaluation {
    pub result: EvalResult,
    pub confidence: Confidence,
    pub error_type: Option<ErrorType>,
}

impl Evaluation {
    pub fn new(result: EvalResult, confidence: Confidence, error_type: Option<ErrorType>) -> Self {
        Self {
            result,
            confidence,
            error_type,
        }
    }

    /// The conservative default used whenever grading is impossible or fails.
    pub fn unknown() -> Self {
        Self::new(EvalResult::Unknown, Confidence::Low, None)
    }

    /// Returned for greetings, thanks and other messages that are not answers.
    pub fn off_topic() -> Self {
        Self::new(EvalResult::Unknown, Confidence::High, Some(ErrorType::OffTopic))
    }

    pub fn correct(confidence: Confidence) -> Self {
        Self::new(EvalResult::Correct, confidence, None)
    }

    pub fn is_correct(&self) -> bool {
        self.result == EvalResult::Correct
    }

    pub fn is_unknown(&self) -> bool {
        self.result == EvalResult::Unknown
    }
}

/// The decision engine's only output, and the only thing allowed to move `phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionType,
    pub next_phase: AgentPhase,
}

impl Decision {
    pub fn new(action: ActionType, next_phase: AgentPhase) -> Self {
        Self { action, next_phase }
    }
}
