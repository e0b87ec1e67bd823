use crate::types::{ActionType, AgentPhase};

/// Failure to obtain or decode a generative completion.
///
/// These never reach the learner: the evaluator and combined agent retry once
/// and then fall back to a conservative default.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("completion call failed: {0}")]
    Completion(String),
    #[error("no JSON object found in completion")]
    MissingJson,
    #[error("completion JSON did not match the expected schema: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("evaluation is inconsistent: {0}")]
    Inconsistent(String),
    #[error("missing fenced `{0}` section")]
    MissingSection(&'static str),
}

/// A decision that the current phase does not permit.
///
/// This is a caller or programmer error; it is reported, never coerced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("action {action} is not allowed in phase {phase}")]
    ActionNotAllowed {
        action: ActionType,
        phase: AgentPhase,
    },
    #[error("phase {phase} requires a confirmed curriculum position")]
    DiagnosticGate { phase: AgentPhase },
}
